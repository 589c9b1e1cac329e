//! Executor engine: the call loop driven by governor messages.
//!
//! ```text
//! Registering ──► Idle ──call──► Running ──► Reporting ──► Idle
//!                  ▲  │
//!                  └──┘ drop_cached
//!
//! any protocol error ──► Fatal
//! ```

use std::io::{Read, Write};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::panic::{AssertUnwindSafe, catch_unwind};
#[cfg(unix)]
use std::path::Path;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::cache::{self, ObjectCache};
use crate::config::ExecutorConfig;
use crate::data::DataInstance;
use crate::error::{Error, Result};
use crate::ipc::protocol::encode_message;
use crate::ipc::{
    CallMessage, Channel, ExecutionInfo, ExecutorMessage, GovernorMessage, InputSlot, OutputData,
    PROTOCOL_VERSION, ResultMessage,
};
use crate::paths::ExecutorDirs;
use crate::spec::{ObjectId, OutputSpec};

use super::args;
use super::context::Context;
use super::outputs;
use super::registry::FunctionRegistry;

/// Lifecycle state of an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    /// Announcing itself to the governor.
    Registering,
    /// Waiting for the next message.
    Idle,
    /// Running a task function.
    Running,
    /// Sending the result of a call.
    Reporting,
    /// A protocol error occurred; no further messages are processed.
    Fatal,
}

/// Single-threaded executor serving one governor channel.
pub struct Executor<S: Read + Write> {
    channel: Channel<S>,
    config: ExecutorConfig,
    registry: FunctionRegistry,
    dirs: ExecutorDirs,
    cache: ObjectCache,
    state: ExecutorState,
}

#[cfg(unix)]
impl Executor<UnixStream> {
    /// Connect to the governor's socket at `path` and register.
    pub fn connect(
        path: impl AsRef<Path>,
        config: ExecutorConfig,
        registry: FunctionRegistry,
    ) -> Result<Self> {
        Self::start(Channel::connect(path)?, config, registry)
    }
}

impl<S: Read + Write> Executor<S> {
    /// Connect an executor to the governor over `stream` and register.
    ///
    /// Creates the work and staging directories under the configured root
    /// and sends the `register` message.
    pub fn register(stream: S, config: ExecutorConfig, registry: FunctionRegistry) -> Result<Self> {
        Self::start(Channel::new(stream), config, registry)
    }

    fn start(channel: Channel<S>, config: ExecutorConfig, registry: FunctionRegistry) -> Result<Self> {
        let dirs = ExecutorDirs::new(&config.work_root)?;
        let mut executor = Self {
            channel: channel.with_max_frame_len(config.max_frame_len),
            config,
            registry,
            dirs,
            cache: ObjectCache::new(),
            state: ExecutorState::Registering,
        };

        let register = ExecutorMessage::Register {
            protocol: PROTOCOL_VERSION.to_string(),
            executor_id: executor.config.executor_id,
            executor_type: executor.config.executor_type.clone(),
        };
        if let Err(e) = executor.channel.send(&register) {
            executor.state = ExecutorState::Fatal;
            return Err(e);
        }

        tracing::info!(
            "Executor {} registered as {:?} ({} functions)",
            executor.config.executor_id,
            executor.config.executor_type,
            executor.registry.names().len()
        );
        executor.state = ExecutorState::Idle;
        Ok(executor)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ExecutorState {
        self.state
    }

    /// The object cache.
    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    /// The executor's directories.
    pub fn dirs(&self) -> &ExecutorDirs {
        &self.dirs
    }

    /// Serve messages until a fatal error occurs.
    ///
    /// Only returns on error; a closed channel is [`Error::ConnectionLost`].
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.step()?;
        }
    }

    /// Receive and handle one governor message.
    ///
    /// Task failures are reported to the governor and do not surface here.
    /// Any returned error is fatal and leaves the executor in
    /// [`ExecutorState::Fatal`].
    pub fn step(&mut self) -> Result<()> {
        if self.state == ExecutorState::Fatal {
            return Err(Error::Protocol("executor is in a fatal state".to_string()));
        }

        let result = self.receive_and_handle();
        match &result {
            Ok(()) => self.state = ExecutorState::Idle,
            Err(e) => {
                tracing::error!("Executor {} stopping: {}", self.config.executor_id, e);
                self.state = ExecutorState::Fatal;
            }
        }
        result
    }

    fn receive_and_handle(&mut self) -> Result<()> {
        let message: GovernorMessage = self.channel.receive()?;
        match message {
            GovernorMessage::Call(call) => self.handle_call(call),
            GovernorMessage::DropCached { objects } => {
                let removed = self.cache.drop_cached(&objects);
                tracing::debug!(
                    "Dropped {} of {} requested cache entries ({} left)",
                    removed,
                    objects.len(),
                    self.cache.len()
                );
                Ok(())
            }
        }
    }

    fn handle_call(&mut self, call: CallMessage) -> Result<()> {
        self.state = ExecutorState::Running;
        let task_id = call.spec.id;
        let start_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let clock = Instant::now();

        tracing::info!("Running task {} ({})", task_id, call.spec.task_type);

        let (inputs, newly_cached) = self.decode_inputs(&call.inputs)?;

        let mut ctx = Context::new(task_id, &self.dirs);
        let outcome = self.execute(&call, &inputs, &mut ctx);
        drop(inputs);

        self.state = ExecutorState::Reporting;
        let mut info = ExecutionInfo {
            start_ms,
            duration_ms: clock.elapsed().as_millis() as u64,
            debug: ctx.debug_text(),
            error: None,
        };

        // A result that cannot be framed fails the task instead of the channel.
        let success = outcome.and_then(|(outputs, instances)| {
            let payload = encode_message(&ExecutorMessage::Result(ResultMessage {
                task: task_id,
                success: true,
                info: info.clone(),
                outputs,
                cached_objects: newly_cached.clone(),
            }))?;
            if payload.len() > self.channel.max_frame_len() {
                return Err(Error::OutputType(format!(
                    "result of {} bytes exceeds the {} byte message limit",
                    payload.len(),
                    self.channel.max_frame_len()
                )));
            }
            Ok((payload, instances))
        });

        let payload = match success {
            Ok((payload, instances)) => {
                ctx.release(&instances);
                tracing::info!(
                    "Task {} finished in {} ms with {} outputs",
                    task_id,
                    info.duration_ms,
                    instances.len()
                );
                payload
            }
            Err(e) => {
                tracing::info!("Task {} failed: {}", task_id, e);
                ctx.discard();
                let evicted = self.cache.drop_cached(&newly_cached);
                if evicted > 0 {
                    tracing::debug!("Rolled back {} cache entries of task {}", evicted, task_id);
                }
                info.error = Some(e.to_string());
                encode_message(&ExecutorMessage::Result(ResultMessage {
                    task: task_id,
                    success: false,
                    info,
                    outputs: Vec::new(),
                    cached_objects: Vec::new(),
                }))?
            }
        };
        drop(ctx);

        self.channel.send_payload(&payload)
    }

    /// Materialize all inputs and update the cache.
    ///
    /// Returns the instances in input order and the ids newly inserted into
    /// the cache. Errors here are fatal.
    fn decode_inputs(
        &mut self,
        slots: &[InputSlot],
    ) -> Result<(Vec<Arc<DataInstance>>, Vec<ObjectId>)> {
        if slots.is_empty() {
            return Err(Error::Protocol("call has no closure input".to_string()));
        }

        let mut inputs = Vec::with_capacity(slots.len());
        let mut newly_cached = Vec::new();

        for (index, slot) in slots.iter().enumerate() {
            let instance = cache::decode_input(slot, &self.cache)?;
            if cache::should_cache(index, slot) && self.cache.insert(slot.spec.id, instance.clone()) {
                newly_cached.push(slot.spec.id);
            }
            inputs.push(instance);
        }

        Ok((inputs, newly_cached))
    }

    /// Run the task function and produce encoded outputs along with the
    /// instances behind them.
    ///
    /// Every error returned here is a task failure.
    fn execute(
        &self,
        call: &CallMessage,
        inputs: &[Arc<DataInstance>],
        ctx: &mut Context,
    ) -> Result<(Vec<OutputData>, Vec<Arc<DataInstance>>)> {
        let declared = OutputSpec::zip(&call.outputs, &call.spec.config.encode_outputs);

        if !call.spec.task_type.contains('/')
            || call.spec.executor_kind() != self.config.executor_type
        {
            return Err(Error::TaskType {
                task_type: call.spec.task_type.clone(),
                executor_type: self.config.executor_type.clone(),
            });
        }

        let (name, function) = self.registry.resolve(&inputs[cache::CLOSURE_INPUT])?;
        let arguments = args::reconstruct(&call.spec.config, &inputs[cache::CLOSURE_INPUT + 1..])?;

        self.dirs.reset_work_dir()?;
        if self.config.change_dir {
            std::env::set_current_dir(&self.dirs.work_dir)?;
        }

        tracing::debug!(
            "Calling {} with {} positional and {} keyword arguments",
            name,
            arguments.len(),
            arguments.keyword.len()
        );

        let returned = catch_unwind(AssertUnwindSafe(|| function(ctx, arguments)))
            .map_err(|payload| Error::TaskPanic(panic_message(payload.as_ref())))?
            .map_err(|e| {
                tracing::debug!("Task function {} failed: {:?}", name, e);
                Error::Task(format!("{:#}", e))
            })?;

        let values = outputs::reconcile(returned, &declared)?;
        let instances = outputs::normalize(values, &declared, ctx)?;

        let encoded = instances
            .iter()
            .map(|instance| {
                Ok(OutputData {
                    data: cache::encode_output(instance)?,
                    content_type: instance.content_type().map(str::to_string),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok((encoded, instances))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
