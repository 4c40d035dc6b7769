//! In-memory GPIO board for tests
//!
//! Implements the backend traits over shared state so tests can script
//! levels, edges and failures, and inspect what was written.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use super::line::{
    BackendKind, EdgeEvent, EdgeKind, GpioChip, GpioError, GpioLine, Level, LineRequest, Polarity,
};

#[derive(Debug, Clone, Copy)]
pub enum SimFailure {
    PermissionDenied,
    Busy,
}

enum SimEdge {
    Edge(EdgeKind, Instant),
    Fail,
}

struct SimLine {
    claimed: bool,
    level: Level,
    reads: VecDeque<Level>,
    edges: VecDeque<SimEdge>,
    writes: Vec<Level>,
    fail_writes: bool,
}

impl Default for SimLine {
    fn default() -> Self {
        Self {
            claimed: false,
            level: Level::High,
            reads: VecDeque::new(),
            edges: VecDeque::new(),
            writes: Vec::new(),
            fail_writes: false,
        }
    }
}

#[derive(Default)]
struct SimState {
    lines: HashMap<u32, SimLine>,
    chips_opened: usize,
    closed: bool,
    deny: HashMap<u32, SimFailure>,
    fail_release: HashSet<u32>,
    polling_only: HashSet<u32>,
}

/// Shared handle to the simulated board
#[derive(Clone, Default)]
pub struct SimBoard {
    state: Arc<Mutex<SimState>>,
}

impl SimBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    /// Open a chip handle on the board
    pub fn chip(&self) -> Box<dyn GpioChip> {
        self.lock().chips_opened += 1;
        Box::new(SimChip {
            board: self.clone(),
        })
    }

    pub fn chips_opened(&self) -> usize {
        self.lock().chips_opened
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn is_claimed(&self, offset: u32) -> bool {
        self.lock().lines.get(&offset).map(|l| l.claimed).unwrap_or(false)
    }

    pub fn level(&self, offset: u32) -> Level {
        self.lock().lines.entry(offset).or_default().level
    }

    pub fn set_level(&self, offset: u32, level: Level) {
        self.lock().lines.entry(offset).or_default().level = level;
    }

    /// Levels returned by successive reads before falling back to `level`
    pub fn queue_reads(&self, offset: u32, levels: &[Level]) {
        self.lock()
            .lines
            .entry(offset)
            .or_default()
            .reads
            .extend(levels.iter().copied());
    }

    pub fn push_edge_at(&self, offset: u32, at: Instant) {
        self.lock()
            .lines
            .entry(offset)
            .or_default()
            .edges
            .push_back(SimEdge::Edge(EdgeKind::Falling, at));
    }

    pub fn push_edge_failure(&self, offset: u32) {
        self.lock()
            .lines
            .entry(offset)
            .or_default()
            .edges
            .push_back(SimEdge::Fail);
    }

    pub fn pending_edges(&self, offset: u32) -> usize {
        self.lock().lines.get(&offset).map(|l| l.edges.len()).unwrap_or(0)
    }

    pub fn writes(&self, offset: u32) -> Vec<Level> {
        self.lock()
            .lines
            .get(&offset)
            .map(|l| l.writes.clone())
            .unwrap_or_default()
    }

    pub fn fail_writes(&self, offset: u32) {
        self.lock().lines.entry(offset).or_default().fail_writes = true;
    }

    pub fn deny_request(&self, offset: u32, failure: SimFailure) {
        self.lock().deny.insert(offset, failure);
    }

    pub fn fail_release(&self, offset: u32) {
        self.lock().fail_release.insert(offset);
    }

    /// Lines on this offset report no edge support, forcing level sampling
    pub fn polling_only(&self, offset: u32) {
        self.lock().polling_only.insert(offset);
    }
}

struct SimChip {
    board: SimBoard,
}

impl GpioChip for SimChip {
    fn kind(&self) -> BackendKind {
        BackendKind::LineChip
    }

    fn name(&self) -> &str {
        "sim"
    }

    fn request_line(&mut self, request: &LineRequest) -> Result<Box<dyn GpioLine>, GpioError> {
        let mut state = self.board.lock();
        if let Some(failure) = state.deny.get(&request.offset) {
            return Err(match failure {
                SimFailure::PermissionDenied => GpioError::PermissionDenied {
                    path: "sim".to_string(),
                },
                SimFailure::Busy => GpioError::DeviceBusy {
                    offset: request.offset,
                },
            });
        }
        let edges = request.edge.is_some() && !state.polling_only.contains(&request.offset);
        let line = state.lines.entry(request.offset).or_default();
        if line.claimed {
            return Err(GpioError::DeviceBusy {
                offset: request.offset,
            });
        }
        line.claimed = true;
        if request.direction == super::line::Direction::Output {
            line.level = request.initial;
        }
        Ok(Box::new(SimLineHandle {
            board: self.board.clone(),
            offset: request.offset,
            polarity: request.polarity,
            edges,
        }))
    }

    fn close(self: Box<Self>) -> Result<(), GpioError> {
        self.board.lock().closed = true;
        Ok(())
    }
}

struct SimLineHandle {
    board: SimBoard,
    offset: u32,
    polarity: Polarity,
    edges: bool,
}

impl GpioLine for SimLineHandle {
    fn offset(&self) -> u32 {
        self.offset
    }

    fn polarity(&self) -> Polarity {
        self.polarity
    }

    fn read(&mut self) -> Result<Level, GpioError> {
        let mut state = self.board.lock();
        let line = state.lines.entry(self.offset).or_default();
        Ok(line.reads.pop_front().unwrap_or(line.level))
    }

    fn write(&mut self, level: Level) -> Result<(), GpioError> {
        let mut state = self.board.lock();
        let line = state.lines.entry(self.offset).or_default();
        if line.fail_writes {
            return Err(GpioError::Io("simulated write failure".to_string()));
        }
        line.level = level;
        line.writes.push(level);
        Ok(())
    }

    fn supports_edge_events(&self) -> bool {
        self.edges
    }

    fn wait_for_edge(&mut self, timeout: Duration) -> Result<Option<EdgeEvent>, GpioError> {
        let next = self
            .board
            .lock()
            .lines
            .entry(self.offset)
            .or_default()
            .edges
            .pop_front();
        match next {
            Some(SimEdge::Edge(kind, at)) => Ok(Some(EdgeEvent {
                offset: self.offset,
                kind,
                at,
            })),
            Some(SimEdge::Fail) => Err(GpioError::Io("simulated edge failure".to_string())),
            None => {
                thread::sleep(timeout.min(Duration::from_millis(2)));
                Ok(None)
            }
        }
    }

    fn release(self: Box<Self>) -> Result<(), GpioError> {
        let mut state = self.board.lock();
        if let Some(line) = state.lines.get_mut(&self.offset) {
            line.claimed = false;
        }
        if state.fail_release.contains(&self.offset) {
            return Err(GpioError::Io("simulated release failure".to_string()));
        }
        Ok(())
    }
}
