use super::config::CommandConfig;
use super::context::CommandContext;
use super::EngineServices;
use crate::core::{EngineError, Result};
use std::time::Instant;
use tracing::{debug, warn};

/// State threaded through the interceptor chain for one command invocation.
///
/// The typed command output does not travel through the chain; the executor
/// erases it into the `body` closure and keeps a result slot outside.
pub struct CommandInvocation<'a> {
    config: &'a CommandConfig,
    services: &'a EngineServices,
    context: Option<CommandContext>,
    body: &'a mut dyn FnMut(&mut CommandContext) -> Result<()>,
}

impl<'a> CommandInvocation<'a> {
    pub(crate) fn new(
        config: &'a CommandConfig,
        services: &'a EngineServices,
        body: &'a mut dyn FnMut(&mut CommandContext) -> Result<()>,
    ) -> Self {
        Self {
            config,
            services,
            context: None,
            body,
        }
    }

    pub fn config(&self) -> &CommandConfig {
        self.config
    }

    pub fn services(&self) -> &EngineServices {
        self.services
    }

    pub fn context(&self) -> Option<&CommandContext> {
        self.context.as_ref()
    }

    pub fn context_mut(&mut self) -> Option<&mut CommandContext> {
        self.context.as_mut()
    }

    pub fn set_context(&mut self, context: CommandContext) {
        self.context = Some(context);
    }

    /// Drop the current context so the next chain pass starts fresh. Used by
    /// the retry interceptor between attempts.
    pub fn reset_context(&mut self) {
        self.context = None;
    }
}

/// One stage of the command execution pipeline.
///
/// Interceptors run in registration order; each is free to short-circuit by
/// not calling [`InterceptorChain::proceed`], or to run the remainder of the
/// chain multiple times (retry).
pub trait CommandInterceptor: Send + Sync {
    fn name(&self) -> &'static str;

    fn execute(
        &self,
        chain: InterceptorChain<'_>,
        invocation: &mut CommandInvocation<'_>,
    ) -> Result<()>;
}

/// The remaining interceptor stages after the current one.
#[derive(Clone, Copy)]
pub struct InterceptorChain<'a> {
    interceptors: &'a [Box<dyn CommandInterceptor>],
}

impl<'a> InterceptorChain<'a> {
    pub(crate) fn new(interceptors: &'a [Box<dyn CommandInterceptor>]) -> Self {
        Self { interceptors }
    }

    /// Run the rest of the chain. Past the last interceptor, the command body
    /// itself runs against the context the chain created.
    pub fn proceed(&self, invocation: &mut CommandInvocation<'_>) -> Result<()> {
        match self.interceptors.split_first() {
            Some((head, rest)) => head.execute(InterceptorChain::new(rest), invocation),
            None => {
                let CommandInvocation { context, body, .. } = invocation;
                let ctx = context.as_mut().ok_or_else(|| {
                    EngineError::IllegalState(
                        "command body reached without a command context".into(),
                    )
                })?;
                body(ctx)
            }
        }
    }
}

/// Logs command start/finish and duration.
pub struct LogInterceptor;

impl CommandInterceptor for LogInterceptor {
    fn name(&self) -> &'static str {
        "log"
    }

    fn execute(
        &self,
        chain: InterceptorChain<'_>,
        invocation: &mut CommandInvocation<'_>,
    ) -> Result<()> {
        let started = Instant::now();
        debug!("command started");
        let result = chain.proceed(invocation);
        match &result {
            Ok(()) => debug!(elapsed_ms = started.elapsed().as_millis() as u64, "command finished"),
            Err(err) => warn!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %err,
                "command failed"
            ),
        }
        result
    }
}

/// Retries the whole downstream chain on optimistic-lock conflicts, with the
/// command body re-executed from scratch on a fresh context each attempt.
pub struct RetryInterceptor {
    attempts: u32,
}

impl RetryInterceptor {
    pub fn new(attempts: u32) -> Self {
        Self { attempts }
    }
}

impl CommandInterceptor for RetryInterceptor {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn execute(
        &self,
        chain: InterceptorChain<'_>,
        invocation: &mut CommandInvocation<'_>,
    ) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match chain.proceed(invocation) {
                Err(err) if err.is_optimistic_locking() && attempt < self.attempts => {
                    warn!(attempt, error = %err, "optimistic locking conflict, retrying command");
                    invocation.reset_context();
                }
                other => return other,
            }
        }
    }
}

/// Opens the command context, runs the rest of the chain, and commits or
/// rolls back exactly once. Sessions are closed on every exit path.
pub struct TransactionInterceptor;

impl CommandInterceptor for TransactionInterceptor {
    fn name(&self) -> &'static str {
        "transaction"
    }

    fn execute(
        &self,
        chain: InterceptorChain<'_>,
        invocation: &mut CommandInvocation<'_>,
    ) -> Result<()> {
        if invocation.context().is_none() {
            let services = invocation.services();
            let context = CommandContext::new(
                *invocation.config(),
                services.store.clone(),
                services.dependency_order.clone(),
            );
            invocation.set_context(context);
        }

        let result = chain.proceed(invocation);

        let ctx = invocation.context_mut().ok_or_else(|| {
            EngineError::IllegalState("command context vanished mid-command".into())
        })?;
        let outcome = match result {
            Ok(()) => match ctx.commit() {
                Ok(_) => Ok(()),
                Err(commit_err) => {
                    ctx.record_exception(&commit_err);
                    ctx.rollback();
                    Err(commit_err)
                }
            },
            Err(err) => {
                ctx.record_exception(&err);
                ctx.rollback();
                Err(err)
            }
        };
        ctx.close();
        outcome
    }
}
