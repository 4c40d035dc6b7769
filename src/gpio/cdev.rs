//! Line-based backend over the GPIO character device
//!
//! One chip is opened per process; each line is its own kernel request so
//! the button and LED can be driven from different threads.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use gpiocdev::chip::Chip;
use gpiocdev::line::{Bias as CdevBias, EdgeDetection, EdgeKind as CdevEdgeKind, Value};
use gpiocdev::Request;
use gpiocdev_uapi::Error as UapiError;
use tracing::debug;

use super::line::{
    Bias, BackendKind, Direction, Edge, EdgeEvent, EdgeKind, GpioChip, GpioError, GpioLine, Level,
    LineRequest, Polarity,
};

/// An opened `/dev/gpiochipN`
pub struct CdevChip {
    path: PathBuf,
    name: String,
    num_lines: u32,
    _chip: Chip,
}

impl CdevChip {
    /// Open `path` and check it can service every offset in `offsets`
    pub fn open(path: &Path, offsets: &[u32]) -> Result<Self, GpioError> {
        let name = path.display().to_string();

        // Surfaces EACCES/ENOENT with a proper io::ErrorKind
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| GpioError::from_io(&e, &name, None))?;

        let chip = Chip::from_path(path)
            .map_err(|e| classify(e, &name, None))?;
        let info = chip
            .info()
            .map_err(|e| classify(e, &name, None))?;

        if let Some(&offset) = offsets.iter().find(|&&o| o >= info.num_lines) {
            return Err(GpioError::LineOutOfRange {
                chip: name,
                offset,
                num_lines: info.num_lines,
            });
        }

        debug!(chip = %name, num_lines = info.num_lines, "gpio chip opened");

        Ok(Self {
            path: path.to_path_buf(),
            name,
            num_lines: info.num_lines,
            _chip: chip,
        })
    }
}

impl GpioChip for CdevChip {
    fn kind(&self) -> BackendKind {
        BackendKind::LineChip
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn request_line(&mut self, request: &LineRequest) -> Result<Box<dyn GpioLine>, GpioError> {
        if request.offset >= self.num_lines {
            return Err(GpioError::LineOutOfRange {
                chip: self.name.clone(),
                offset: request.offset,
                num_lines: self.num_lines,
            });
        }

        let mut builder = Request::builder();
        builder
            .on_chip(&self.path)
            .with_consumer(request.consumer)
            .with_line(request.offset);

        // Polarity is applied in software, so lines are requested raw
        match request.direction {
            Direction::Output => {
                builder.as_output(to_value(request.initial));
            }
            Direction::Input => {
                builder.as_input();
                match request.bias {
                    Bias::PullUp => {
                        builder.with_bias(CdevBias::PullUp);
                    }
                    Bias::Disabled => {}
                }
                if let Some(edge) = request.edge {
                    builder.with_edge_detection(match edge {
                        Edge::Falling => EdgeDetection::FallingEdge,
                    });
                }
            }
        }

        let req = builder
            .request()
            .map_err(|e| classify(e, &self.name, Some(request.offset)))?;

        Ok(Box::new(CdevLine {
            chip: self.name.clone(),
            offset: request.offset,
            polarity: request.polarity,
            edges: request.edge.is_some(),
            req,
        }))
    }

    fn close(self: Box<Self>) -> Result<(), GpioError> {
        debug!(chip = %self.name, "gpio chip closed");
        Ok(())
    }
}

struct CdevLine {
    chip: String,
    offset: u32,
    polarity: Polarity,
    edges: bool,
    req: Request,
}

impl CdevLine {
    fn err(&self, e: gpiocdev::Error) -> GpioError {
        classify(e, &self.chip, Some(self.offset))
    }
}

impl GpioLine for CdevLine {
    fn offset(&self) -> u32 {
        self.offset
    }

    fn polarity(&self) -> Polarity {
        self.polarity
    }

    fn read(&mut self) -> Result<Level, GpioError> {
        let value = self.req.value(self.offset).map_err(|e| self.err(e))?;
        Ok(from_value(value))
    }

    fn write(&mut self, level: Level) -> Result<(), GpioError> {
        self.req
            .set_value(self.offset, to_value(level))
            .map_err(|e| self.err(e))?;
        Ok(())
    }

    fn supports_edge_events(&self) -> bool {
        self.edges
    }

    fn wait_for_edge(&mut self, timeout: Duration) -> Result<Option<EdgeEvent>, GpioError> {
        if !self.edges {
            return Err(GpioError::Unsupported(format!(
                "line {} was requested without edge detection",
                self.offset
            )));
        }
        if !self.req.wait_edge_event(timeout).map_err(|e| self.err(e))? {
            return Ok(None);
        }
        let event = self.req.read_edge_event().map_err(|e| self.err(e))?;
        Ok(Some(EdgeEvent {
            offset: self.offset,
            kind: match event.kind {
                CdevEdgeKind::Rising => EdgeKind::Rising,
                CdevEdgeKind::Falling => EdgeKind::Falling,
            },
            at: Instant::now(),
        }))
    }

    fn release(self: Box<Self>) -> Result<(), GpioError> {
        debug!(chip = %self.chip, offset = self.offset, "gpio line released");
        // Dropping the request closes its file descriptor
        drop(self.req);
        Ok(())
    }
}

/// Prefer the errno carried by the error; fall back to its text
fn classify(err: gpiocdev::Error, path: &str, offset: Option<u32>) -> GpioError {
    match &err {
        gpiocdev::Error::Os(errno) | gpiocdev::Error::Uapi(_, UapiError::Os(errno)) => {
            GpioError::from_errno(errno.0, path, offset)
        }
        _ => GpioError::from_message(&err.to_string(), path, offset),
    }
}

fn to_value(level: Level) -> Value {
    match level {
        Level::High => Value::Active,
        Level::Low => Value::Inactive,
    }
}

fn from_value(value: Value) -> Level {
    match value {
        Value::Active => Level::High,
        Value::Inactive => Level::Low,
    }
}
