//! Composable order-acceptance rules.
//!
//! The processor runs every discovered order through an ordered,
//! short-circuiting chain of rules before touching an adapter's fill
//! path. Cheap local checks come first; anything that needs an RPC call
//! runs last, and the destination status lookup is cached in the
//! per-invocation context so later consumers do not repeat it.
//!
//! A rule distinguishes a *violation* (this order is not for us; logged
//! at info, the cursor advances) from an *error* (we could not decide;
//! the event is retried).

use async_trait::async_trait;
use solver_adapters::{AdapterError, AdapterInterface};
use solver_types::{OpenEvent, OrderId, OrderStatus};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;

pub mod builtin;

pub use builtin::{
	AllowanceRule, BalanceRule, FillDeadlineRule, NotAlreadySettledRule, ProfitabilityRule,
	RoutePolicyRule,
};

/// Why a rule stopped an order.
#[derive(Debug, Error)]
pub enum RuleError {
	/// The order fails policy; not an error, the cursor advances.
	#[error("{rule}: {reason}")]
	Violation { rule: &'static str, reason: String },
	/// The rule could not reach a verdict.
	#[error(transparent)]
	Adapter(#[from] AdapterError),
}

impl RuleError {
	/// Shorthand for building a violation.
	pub fn violation(rule: &'static str, reason: impl Into<String>) -> Self {
		RuleError::Violation {
			rule,
			reason: reason.into(),
		}
	}
}

/// Per-invocation state shared by the rule chain.
pub struct RuleContext {
	/// Adapter for the order's destination chain.
	pub destination: Arc<dyn AdapterInterface>,
	/// Adapter for the origin chain, when one is registered; needed to
	/// normalize `min_received` decimals.
	pub origin: Option<Arc<dyn AdapterInterface>>,
	status: OnceCell<OrderStatus>,
}

impl RuleContext {
	/// Builds a context for one `process` invocation.
	pub fn new(
		destination: Arc<dyn AdapterInterface>,
		origin: Option<Arc<dyn AdapterInterface>>,
	) -> Self {
		Self {
			destination,
			origin,
			status: OnceCell::new(),
		}
	}

	/// Destination status for the order, fetched at most once per
	/// invocation.
	pub async fn destination_status(&self, order_id: &OrderId) -> Result<OrderStatus, RuleError> {
		let status = self
			.status
			.get_or_try_init(|| self.destination.order_status(order_id))
			.await?;
		Ok(*status)
	}
}

/// One acceptance predicate.
#[async_trait]
pub trait Rule: Send + Sync {
	/// Stable name used in violation logs.
	fn name(&self) -> &'static str;

	/// Returns `Ok(())` to let the order continue down the chain.
	async fn check(&self, event: &OpenEvent, ctx: &RuleContext) -> Result<(), RuleError>;
}

/// Ordered, short-circuiting rule chain.
#[derive(Default)]
pub struct RulesEngine {
	rules: Vec<Box<dyn Rule>>,
}

impl RulesEngine {
	/// An engine with no rules; accepts everything.
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends a rule. Order of addition is order of evaluation.
	pub fn add_rule(&mut self, rule: Box<dyn Rule>) -> &mut Self {
		self.rules.push(rule);
		self
	}

	/// The built-in chain in its required order: route policy and
	/// deadline before any RPC-backed check, profitability before the
	/// status lookup.
	pub fn standard(config: &solver_config::Config) -> Self {
		let mut engine = Self::new();
		engine
			.add_rule(Box::new(RoutePolicyRule::new(
				config.block_list.clone(),
				config.allow_list.clone(),
			)))
			.add_rule(Box::new(FillDeadlineRule::new()))
			.add_rule(Box::new(BalanceRule))
			.add_rule(Box::new(AllowanceRule))
			.add_rule(Box::new(ProfitabilityRule))
			.add_rule(Box::new(NotAlreadySettledRule));
		engine
	}

	/// Runs the chain, stopping at the first violation or error.
	pub async fn evaluate(&self, event: &OpenEvent, ctx: &RuleContext) -> Result<(), RuleError> {
		for rule in &self.rules {
			rule.check(event, ctx).await?;
		}
		Ok(())
	}
}
