// ============================================================================
// Engine facade: configuration, bootstrap and the public entry points
// ============================================================================

use crate::agenda::{
    run_agenda, BreakpointPredicate, Continuation, InstanceRuntime, Operation,
};
use crate::command::{
    CommandConfig, CommandContext, CommandExecutor, CommandInterceptor, EngineServices,
};
use crate::core::{new_id, EngineError, Result};
use crate::event::{CorrelationEvent, EventRegistry};
use crate::job::{
    AsyncExecutor, AsyncExecutorHandle, ChannelMessageDispatcher, JobHandler, JobHandlerRegistry,
    JobScheduler, MessageDispatcher, MessageWorker,
};
use crate::persistence::{EntityDependencyOrder, EntityStore, InMemoryEngineStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Attempts per command before an optimistic-lock conflict is surfaced.
    pub retry_attempts: u32,

    /// Identity this node stamps on acquired job locks.
    pub lock_owner: String,

    /// How long an acquired job lock is valid.
    pub lock_duration: chrono::Duration,

    /// Lock extension applied when a claimed job is voluntarily released,
    /// keeping the expired-lock sweep from racing the release.
    pub unacquire_lock_extension: chrono::Duration,

    /// Maximum jobs claimed per acquisition pass.
    pub acquire_page_size: usize,

    /// Acquisition backoff bounds when no work is found.
    pub idle_backoff_min: Duration,
    pub idle_backoff_max: Duration,

    /// Interval between expired-lock sweeps.
    pub sweep_interval: Duration,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            retry_attempts: 3,
            lock_owner: new_id(),
            lock_duration: chrono::Duration::minutes(5),
            unacquire_lock_extension: chrono::Duration::seconds(60),
            acquire_page_size: 10,
            idle_backoff_min: Duration::from_millis(50),
            idle_backoff_max: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(10),
        }
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn lock_owner(mut self, owner: impl Into<String>) -> Self {
        self.lock_owner = owner.into();
        self
    }

    pub fn lock_duration(mut self, duration: chrono::Duration) -> Self {
        self.lock_duration = duration;
        self
    }

    pub fn unacquire_lock_extension(mut self, extension: chrono::Duration) -> Self {
        self.unacquire_lock_extension = extension;
        self
    }

    pub fn acquire_page_size(mut self, size: usize) -> Self {
        self.acquire_page_size = size;
        self
    }

    pub fn idle_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.idle_backoff_min = min;
        self.idle_backoff_max = max;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry_attempts == 0 {
            return Err(EngineError::IllegalArgument(
                "retry_attempts must be at least 1".into(),
            ));
        }
        if self.lock_owner.is_empty() {
            return Err(EngineError::IllegalArgument(
                "lock_owner must not be empty".into(),
            ));
        }
        if self.lock_duration <= chrono::Duration::zero() {
            return Err(EngineError::IllegalArgument(
                "lock_duration must be positive".into(),
            ));
        }
        if self.unacquire_lock_extension <= chrono::Duration::zero() {
            return Err(EngineError::IllegalArgument(
                "unacquire_lock_extension must be positive".into(),
            ));
        }
        if self.acquire_page_size == 0 {
            return Err(EngineError::IllegalArgument(
                "acquire_page_size must be at least 1".into(),
            ));
        }
        if self.idle_backoff_min > self.idle_backoff_max {
            return Err(EngineError::IllegalArgument(
                "idle_backoff_min must not exceed idle_backoff_max".into(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(EngineError::IllegalArgument(
                "sweep_interval must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Assembles an [`Engine`] from its pluggable parts.
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn EntityStore>>,
    handlers: Vec<Arc<dyn JobHandler>>,
    dispatcher: Option<Arc<dyn MessageDispatcher>>,
    runtime: Option<Arc<dyn InstanceRuntime>>,
    breakpoints: Option<Arc<dyn BreakpointPredicate>>,
    interceptors: Vec<Box<dyn CommandInterceptor>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::new(),
            store: None,
            handlers: Vec::new(),
            dispatcher: None,
            runtime: None,
            breakpoints: None,
            interceptors: Vec::new(),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default in-memory store.
    pub fn store(mut self, store: Arc<dyn EntityStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn job_handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn message_dispatcher(mut self, dispatcher: Arc<dyn MessageDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// The model interpreter operations are dispatched to. Without one the
    /// engine still executes commands and jobs, but cannot run operations.
    pub fn instance_runtime(mut self, runtime: Arc<dyn InstanceRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn breakpoints(mut self, breakpoints: Arc<dyn BreakpointPredicate>) -> Self {
        self.breakpoints = Some(breakpoints);
        self
    }

    /// Add a custom interceptor, running before the built-in chain.
    pub fn interceptor(mut self, interceptor: Box<dyn CommandInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn build(self) -> Result<Engine> {
        self.config.validate()?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryEngineStore::new()));
        let dependency_order = Arc::new(EntityDependencyOrder::bootstrap());
        let services = EngineServices::new(Arc::clone(&store), dependency_order);
        let commands = Arc::new(CommandExecutor::with_interceptors(
            services,
            self.config.retry_attempts,
            self.interceptors,
        ));
        let handlers = Arc::new(JobHandlerRegistry::bootstrap(self.handlers));
        let jobs = Arc::new(JobScheduler::new(
            Arc::clone(&store),
            handlers,
            self.dispatcher,
            self.config.unacquire_lock_extension,
        ));
        info!(lock_owner = %self.config.lock_owner, "engine built");
        Ok(Engine {
            config: self.config,
            store,
            commands,
            jobs,
            runtime: self.runtime,
            breakpoints: self.breakpoints,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The assembled engine: command kernel, agenda dispatch, job scheduling and
/// event correlation behind one handle. Cheap to share via the accessors; all
/// services are internally `Arc`ed.
pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn EntityStore>,
    commands: Arc<CommandExecutor>,
    jobs: Arc<JobScheduler>,
    runtime: Option<Arc<dyn InstanceRuntime>>,
    breakpoints: Option<Arc<dyn BreakpointPredicate>>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn command_executor(&self) -> &Arc<CommandExecutor> {
        &self.commands
    }

    pub fn job_scheduler(&self) -> &Arc<JobScheduler> {
        &self.jobs
    }

    /// Execute a command with default configuration.
    pub fn execute<C: crate::command::Command>(&self, command: &C) -> Result<C::Output> {
        self.commands.execute(command)
    }

    pub fn execute_with_config<C: crate::command::Command>(
        &self,
        config: CommandConfig,
        command: &C,
    ) -> Result<C::Output> {
        self.commands.execute_with_config(config, command)
    }

    /// Plan one operation and drain the agenda inside a single command.
    /// Returns a continuation when a breakpoint suspended execution.
    pub fn run_operation(&self, operation: Operation) -> Result<Option<Continuation>> {
        let runtime = self.runtime()?;
        let breakpoints = self.breakpoints.clone();
        self.commands.execute(&|ctx: &mut CommandContext| {
            ctx.agenda_mut().plan(operation.clone());
            run_agenda(ctx, runtime.as_ref(), breakpoints.as_deref())
        })
    }

    /// Replan a captured continuation onto a fresh command and drain it.
    /// Breakpoints stay armed, so resuming can suspend again further along.
    pub fn resume_continuation(&self, continuation: &Continuation) -> Result<Option<Continuation>> {
        let runtime = self.runtime()?;
        let breakpoints = self.breakpoints.clone();
        self.commands.execute(&|ctx: &mut CommandContext| {
            for operation in &continuation.operations {
                ctx.agenda_mut().plan(operation.clone());
            }
            run_agenda(ctx, runtime.as_ref(), breakpoints.as_deref())
        })
    }

    /// Correlate an external event: consume every matching subscription and
    /// run the triggered operations to quiescence, all in one command.
    /// Returns the scope ids of the triggered instances.
    pub fn correlate_event(&self, event: &CorrelationEvent) -> Result<Vec<String>> {
        let runtime = self.runtime()?;
        let breakpoints = self.breakpoints.clone();
        self.commands.execute(&|ctx: &mut CommandContext| {
            let scope_ids = EventRegistry::correlate(ctx, event)?;
            run_agenda(ctx, runtime.as_ref(), breakpoints.as_deref())?;
            Ok(scope_ids)
        })
    }

    /// Start the background job executor. Must be called inside a tokio
    /// runtime.
    pub fn start_async_executor(&self) -> AsyncExecutorHandle {
        AsyncExecutor::new(
            Arc::clone(&self.jobs),
            Arc::clone(&self.commands),
            self.config.lock_owner.clone(),
            self.config.lock_duration,
            self.config.acquire_page_size,
            self.config.idle_backoff_min,
            self.config.idle_backoff_max,
            self.config.sweep_interval,
        )
        .start()
    }

    /// Spawn a worker for job-ready hints produced by a
    /// [`ChannelMessageDispatcher`].
    pub fn spawn_message_worker(&self, rx: mpsc::UnboundedReceiver<String>) -> JoinHandle<()> {
        MessageWorker::spawn(
            Arc::clone(&self.jobs),
            Arc::clone(&self.commands),
            rx,
            self.config.lock_owner.clone(),
            self.config.lock_duration,
        )
    }

    /// Convenience: build a channel dispatcher pair for wiring into the
    /// builder and [`Engine::spawn_message_worker`].
    pub fn channel_dispatcher() -> (ChannelMessageDispatcher, mpsc::UnboundedReceiver<String>) {
        ChannelMessageDispatcher::new()
    }

    fn runtime(&self) -> Result<&Arc<dyn InstanceRuntime>> {
        self.runtime.as_ref().ok_or_else(|| {
            EngineError::IllegalState("no instance runtime configured".into())
        })
    }
}
