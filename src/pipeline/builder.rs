use std::future::Future;
use std::sync::Arc;

use super::config::PipelineConfig;
use crate::core::{CloseReason, PipelineError, Stream, Token};
use crate::stages::branch::{spawn_batch, spawn_fan_in, spawn_fan_out};
use crate::stages::error::{BoxError, ItemError};
use crate::stages::ordered::spawn_ordered;
use crate::stages::source::{buffer, sink, spawn_generator, spawn_take};
use crate::stages::transform::{spawn_filter, spawn_map, spawn_map_with_error};
use crate::stages::{collect_errors, tee_with_capacity};

/// Entry point for building a [`Pipeline`] with a non-default configuration
///
/// # Example
/// ```rust,ignore
/// let token = Token::new();
/// let squares = PipelineBuilder::new(&token)
///     .with_config(PipelineConfig::new().with_stream_capacity(16))
///     .generate(1..=5)
///     .map(|x| x * x)
///     .collect()
///     .await;
/// ```
pub struct PipelineBuilder {
    token: Token,
    config: PipelineConfig,
}

impl PipelineBuilder {
    pub fn new(token: &Token) -> Self {
        Self {
            token: token.clone(),
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Start a pipeline whose source emits `values` in order
    pub fn generate<T, I>(self, values: I) -> Pipeline<T>
    where
        T: Send + 'static,
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        let current = spawn_generator(&self.token, values, self.config.stream_capacity);
        Pipeline {
            token: self.token,
            current,
            config: Arc::new(self.config),
        }
    }

    /// Start a pipeline from an existing stream
    pub fn attach<T>(self, stream: Stream<T>) -> Pipeline<T> {
        Pipeline {
            token: self.token,
            current: stream,
            config: Arc::new(self.config),
        }
    }
}

/// Fluent chain of stages sharing one token
///
/// Every chained call spawns its stage immediately; terminal calls
/// ([`collect`](Self::collect), [`try_collect`](Self::try_collect),
/// [`for_each`](Self::for_each)) drain the last stream.
///
/// # Example
/// ```rust,ignore
/// let token = Token::new();
/// let out = Pipeline::generate(&token, vec![1, 2, 3, 4, 5])
///     .map(|x| x * x)
///     .filter(|x| *x > 10)
///     .take(1)
///     .collect()
///     .await;
/// assert_eq!(out, vec![16]);
/// ```
pub struct Pipeline<T> {
    token: Token,
    current: Stream<T>,
    config: Arc<PipelineConfig>,
}

impl<T> Pipeline<T>
where
    T: Send + 'static,
{
    /// Start a pipeline with the default configuration
    pub fn generate<I>(token: &Token, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        PipelineBuilder::new(token).generate(values)
    }

    /// Wrap an existing stream with the default configuration
    pub fn from_stream(token: &Token, stream: Stream<T>) -> Self {
        PipelineBuilder::new(token).attach(stream)
    }

    fn then<U>(token: Token, config: Arc<PipelineConfig>, current: Stream<U>) -> Pipeline<U> {
        Pipeline {
            token,
            current,
            config,
        }
    }

    pub fn map<U, F>(self, f: F) -> Pipeline<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        let next = spawn_map(&self.token, self.current, self.config.stream_capacity, f);
        Self::then(self.token, self.config, next)
    }

    pub fn filter<P>(self, predicate: P) -> Pipeline<T>
    where
        P: FnMut(&T) -> bool + Send + 'static,
    {
        let next = spawn_filter(&self.token, self.current, self.config.stream_capacity, predicate);
        Self::then(self.token, self.config, next)
    }

    pub fn map_with_error<U, E, F>(self, f: F) -> Pipeline<Result<U, ItemError>>
    where
        U: Send + 'static,
        E: Into<BoxError>,
        F: FnMut(T) -> Result<U, E> + Send + 'static,
    {
        let next = spawn_map_with_error(&self.token, self.current, self.config.stream_capacity, f);
        Self::then(self.token, self.config, next)
    }

    /// Keep the first `n` values and release everything upstream
    pub fn take(self, n: usize) -> Pipeline<T> {
        let next = spawn_take(&self.token, self.current, n, self.config.stream_capacity);
        Self::then(self.token, self.config, next)
    }

    /// Insert `capacity` slots of slack at this point of the chain
    pub fn buffer(self, capacity: usize) -> Pipeline<T> {
        let next = buffer(&self.token, self.current, capacity);
        Self::then(self.token, self.config, next)
    }

    pub fn batch(self, size: usize) -> Pipeline<Vec<T>> {
        let next = spawn_batch(&self.token, self.current, size, self.config.stream_capacity);
        Self::then(self.token, self.config, next)
    }

    /// Parallel map over `workers` tasks, output in completion order
    pub fn fan_out_fan_in<U, F, Fut>(self, workers: usize, f: F) -> Pipeline<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = U> + Send + 'static,
    {
        let capacity = self.config.stream_capacity;
        let outputs = spawn_fan_out(&self.token, self.current, workers, capacity, f);
        let next = spawn_fan_in(&self.token, outputs, capacity);
        Self::then(self.token, self.config, next)
    }

    /// Parallel map over `workers` tasks, output in input order
    pub fn ordered_fan_out_fan_in<U, F, Fut>(self, workers: usize, f: F) -> Pipeline<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = U> + Send + 'static,
    {
        let next = spawn_ordered(
            &self.token,
            self.current,
            workers,
            self.config.reorder_window,
            self.config.stream_capacity,
            f,
        );
        Self::then(self.token, self.config, next)
    }

    /// Split into two pipelines that see the same values; see [`tee`](crate::stages::tee)
    pub fn tee(self) -> (Pipeline<T>, Pipeline<T>)
    where
        T: Clone,
    {
        let (first, second) = tee_with_capacity(&self.token, self.current, self.config.tee_capacity);
        (
            Self::then(self.token.clone(), Arc::clone(&self.config), first),
            Self::then(self.token, self.config, second),
        )
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn into_stream(self) -> Stream<T> {
        self.current
    }

    /// Drain every value, stopping early on cancellation
    pub async fn collect(self) -> Vec<T> {
        let mut values = Vec::new();
        sink(&self.token, self.current, |value| values.push(value)).await;
        values
    }

    /// Drain every value, failing if the chain was cancelled or a stage failed
    pub async fn try_collect(self) -> Result<Vec<T>, PipelineError> {
        let mut values = Vec::new();
        match sink(&self.token, self.current, |value| values.push(value)).await {
            CloseReason::Exhausted => Ok(values),
            CloseReason::Cancelled => Err(PipelineError::Cancelled),
            CloseReason::Failed(failure) => Err(PipelineError::StageFailed(failure)),
        }
    }

    /// Call `f` for every value and return how the chain ended
    pub async fn for_each<F>(self, f: F) -> CloseReason
    where
        F: FnMut(T),
    {
        sink(&self.token, self.current, f).await
    }
}

impl<T, E> Pipeline<Result<T, E>>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Split into a values pipeline and an errors pipeline; both must be drained concurrently
    pub fn collect_errors(self) -> (Pipeline<T>, Pipeline<E>) {
        let (values, errors) = collect_errors(&self.token, self.current);
        (
            Pipeline {
                token: self.token.clone(),
                current: values,
                config: Arc::clone(&self.config),
            },
            Pipeline {
                token: self.token,
                current: errors,
                config: self.config,
            },
        )
    }
}
