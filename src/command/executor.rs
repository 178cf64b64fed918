use super::config::{CommandConfig, TransactionPropagation};
use super::context::CommandContext;
use super::interceptor::{
    CommandInterceptor, CommandInvocation, InterceptorChain, LogInterceptor, RetryInterceptor,
    TransactionInterceptor,
};
use super::EngineServices;
use crate::core::{EngineError, Result};

/// A single transactional unit of work.
///
/// `run` takes `&self` so the kernel can re-execute the body from scratch
/// when an optimistic-lock conflict forces a retry. Any closure
/// `Fn(&mut CommandContext) -> Result<T>` is a command.
pub trait Command {
    type Output;

    fn run(&self, ctx: &mut CommandContext) -> Result<Self::Output>;
}

impl<F, T> Command for F
where
    F: Fn(&mut CommandContext) -> Result<T>,
{
    type Output = T;

    fn run(&self, ctx: &mut CommandContext) -> Result<T> {
        self(ctx)
    }
}

/// The command execution kernel: runs commands through the interceptor chain
/// and guarantees session cleanup on every exit path.
pub struct CommandExecutor {
    services: EngineServices,
    interceptors: Vec<Box<dyn CommandInterceptor>>,
    default_config: CommandConfig,
}

impl CommandExecutor {
    /// Build the kernel with the default chain: log, retry, transaction.
    pub fn new(services: EngineServices, retry_attempts: u32) -> Self {
        Self::with_interceptors(services, retry_attempts, Vec::new())
    }

    /// Build the kernel with custom interceptors running outermost, before
    /// the default chain.
    pub fn with_interceptors(
        services: EngineServices,
        retry_attempts: u32,
        custom: Vec<Box<dyn CommandInterceptor>>,
    ) -> Self {
        let mut interceptors = custom;
        interceptors.push(Box::new(LogInterceptor));
        interceptors.push(Box::new(RetryInterceptor::new(retry_attempts)));
        interceptors.push(Box::new(TransactionInterceptor));
        Self {
            services,
            interceptors,
            default_config: CommandConfig::new(),
        }
    }

    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    /// Execute a command with the default configuration.
    pub fn execute<C: Command>(&self, command: &C) -> Result<C::Output> {
        self.execute_with_config(self.default_config, command)
    }

    /// Execute a command through the full interceptor chain.
    pub fn execute_with_config<C: Command>(
        &self,
        config: CommandConfig,
        command: &C,
    ) -> Result<C::Output> {
        let mut result: Option<C::Output> = None;
        let mut body = |ctx: &mut CommandContext| -> Result<()> {
            result = Some(command.run(ctx)?);
            Ok(())
        };
        let mut invocation = CommandInvocation::new(&config, &self.services, &mut body);
        InterceptorChain::new(&self.interceptors).proceed(&mut invocation)?;
        result.ok_or_else(|| {
            EngineError::IllegalState("command finished without producing a result".into())
        })
    }

    /// Execute a command from inside another command.
    ///
    /// Policy: when the nested configuration allows context reuse and joins
    /// the transaction (`Required`), the body runs directly on the outer
    /// context with shared agenda and sessions, and the outer command owns
    /// commit/rollback. Otherwise the nested command runs on a fresh context
    /// whose work is flushed immediately and independently of the outer
    /// transaction. This is the single nesting policy process-wide.
    pub fn execute_nested<C: Command>(
        &self,
        outer: &mut CommandContext,
        config: CommandConfig,
        command: &C,
    ) -> Result<C::Output> {
        if config.is_context_reusable()
            && config.transaction_propagation() == TransactionPropagation::Required
        {
            outer.mark_reused();
            return command.run(outer);
        }

        let mut ctx = CommandContext::new(
            config,
            self.services.store.clone(),
            self.services.dependency_order.clone(),
        );
        let result = command.run(&mut ctx);
        let outcome = match result {
            Ok(value) => ctx.commit().map(|_| value),
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
