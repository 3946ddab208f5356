use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::PublisherConfigError;
use crate::publish::Publish;
use crate::publisher::BufferedPublisher;

/// Longest timer period accepted by [`PublisherBuilder::build`].
pub const MAX_INTERVAL: Duration = Duration::from_millis(i32::MAX as u64);
/// Hard ceiling on the number of items a single publisher may hold.
pub const MAX_BUFFER_LIMIT: usize = 10_000_000;
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 10_000;

/// Time-based trigger of a publisher. `Every(Duration::ZERO)` behaves like
/// `Disabled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferingInterval {
    #[default]
    Disabled,
    Every(Duration),
}

impl BufferingInterval {
    pub fn from_millis(ms: u64) -> Self {
        BufferingInterval::Every(Duration::from_millis(ms))
    }

    /// The timer period, if the timer fires at all.
    pub fn period(&self) -> Option<Duration> {
        match self {
            BufferingInterval::Every(period) if !period.is_zero() => Some(*period),
            _ => None,
        }
    }
}

impl From<Duration> for BufferingInterval {
    fn from(period: Duration) -> Self {
        BufferingInterval::Every(period)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseBufferingIntervalError(pub String);

/// Accepts a number of milliseconds, or `disabled` / `-1` for no timer.
impl FromStr for BufferingInterval {
    type Err = ParseBufferingIntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("disabled") || s == "-1" {
            return Ok(BufferingInterval::Disabled);
        }

        let ms = s
            .parse::<u64>()
            .map_err(|_| ParseBufferingIntervalError(s.to_owned()))?;

        Ok(BufferingInterval::from_millis(ms))
    }
}

/// Validated parameters handed to the background loop.
pub(crate) struct Settings<T> {
    pub name: String,
    pub publisher: Arc<dyn Publish<T>>,
    pub period: Option<Duration>,
    pub count: usize,
    pub max_buffer_size: usize,
    pub cancel: CancellationToken,
}

pub struct PublisherBuilder<T> {
    name: Option<String>,
    publisher: Option<Arc<dyn Publish<T>>>,
    interval: BufferingInterval,
    count: i64,
    max_buffer_size: usize,
    cancellation: Option<CancellationToken>,
}

impl<T: Send + 'static> Default for PublisherBuilder<T> {
    fn default() -> Self {
        Self {
            name: None,
            publisher: None,
            interval: BufferingInterval::Disabled,
            count: 0,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            cancellation: None,
        }
    }
}

impl<T: Send + 'static> PublisherBuilder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn publisher<P: Publish<T> + 'static>(mut self, publisher: P) -> Self {
        self.publisher = Some(Arc::new(publisher));
        self
    }

    pub fn shared_publisher(mut self, publisher: Arc<dyn Publish<T>>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn interval(mut self, interval: impl Into<BufferingInterval>) -> Self {
        self.interval = interval.into();
        self
    }

    pub fn count(mut self, count: i64) -> Self {
        self.count = count;
        self
    }

    pub fn max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.max_buffer_size = max_buffer_size;
        self
    }

    /// The publisher stops when this token is cancelled. It only ever
    /// cancels a child of it.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Validates the parameters and spawns the background loop, so it must be
    /// called from within a tokio runtime.
    pub fn build(self) -> Result<BufferedPublisher<T>, PublisherConfigError> {
        let settings = self.validate()?;
        Ok(BufferedPublisher::start(settings))
    }

    pub(crate) fn validate(self) -> Result<Settings<T>, PublisherConfigError> {
        let name = match self.name {
            Some(name) if !name.trim().is_empty() => name,
            _ => return Err(PublisherConfigError::MissingName),
        };
        let Some(publisher) = self.publisher else {
            return Err(PublisherConfigError::MissingPublisher(name));
        };

        if let BufferingInterval::Every(interval) = self.interval {
            if interval > MAX_INTERVAL {
                return Err(PublisherConfigError::IntervalOutOfRange {
                    interval,
                    max: MAX_INTERVAL,
                });
            }
        }
        if self.count < 0 {
            return Err(PublisherConfigError::NegativeCount(self.count));
        }

        let period = self.interval.period();
        let count = usize::try_from(self.count).unwrap_or(usize::MAX);
        if period.is_none() && count == 0 {
            return Err(PublisherConfigError::NoTrigger);
        }

        let required = count.saturating_mul(3).max(1);
        if self.max_buffer_size < required {
            return Err(PublisherConfigError::BufferTooSmall {
                max_buffer_size: self.max_buffer_size,
                required,
            });
        }
        if self.max_buffer_size > MAX_BUFFER_LIMIT {
            return Err(PublisherConfigError::BufferTooLarge {
                max_buffer_size: self.max_buffer_size,
                limit: MAX_BUFFER_LIMIT,
            });
        }

        let cancel = self
            .cancellation
            .map(|parent| parent.child_token())
            .unwrap_or_default();

        Ok(Settings {
            name,
            publisher,
            period,
            count,
            max_buffer_size: self.max_buffer_size,
            cancel,
        })
    }
}
