//! The intent processor: rules, fill, settle.
//!
//! One stateless component receives every normalized `Open` event from
//! every listener. It routes by the Hyperlane domain in the first fill
//! instruction, gates the order through the rules engine, then drives
//! the destination adapter through whatever remains of
//! `fill -> settle`. All ordering and nonce safety lives below, in the
//! listeners and the per-chain adapter locks; the processor itself can
//! run concurrently for any number of chains.

use async_trait::async_trait;
use solver_adapters::{AdapterError, AdapterRegistry};
use solver_listener::{HandlerError, OpenEventHandler};
use solver_rules::{RuleContext, RuleError, RulesEngine};
use solver_types::{FillAction, OpenEvent};
use std::sync::Arc;
use thiserror::Error;

/// Errors the processor reports back to listeners. Any of these keeps
/// the cursor where it is so the event is re-delivered.
#[derive(Debug, Error)]
pub enum ProcessError {
	/// The order payload names no usable destination.
	#[error("order has no fill instructions")]
	NoDestination,
	/// No adapter is registered for the destination domain. Fail closed:
	/// an order we cannot route must not be marked processed.
	#[error("no adapter registered for destination domain {0}")]
	UnknownDestination(u64),
	/// A rule could not reach a verdict.
	#[error(transparent)]
	Rule(AdapterError),
	/// Fill or settle failed on the destination.
	#[error(transparent)]
	Adapter(#[from] AdapterError),
}

/// Stateless `Open` event consumer.
pub struct IntentProcessor {
	registry: Arc<AdapterRegistry>,
	rules: RulesEngine,
}

impl IntentProcessor {
	/// Builds a processor over the given adapter table and rule chain.
	pub fn new(registry: Arc<AdapterRegistry>, rules: RulesEngine) -> Self {
		Self { registry, rules }
	}

	/// Handles one event end to end.
	///
	/// `Ok(true)` means the order is fully dealt with (filled and
	/// settled, or already complete); `Ok(false)` means it was skipped
	/// by policy. Either way the cursor may advance. An `Err` means the
	/// event must be re-delivered.
	pub async fn process(&self, event: &OpenEvent) -> Result<bool, ProcessError> {
		let domain = event
			.destination_domain()
			.ok_or(ProcessError::NoDestination)?;
		let destination = self
			.registry
			.by_domain(domain)
			.ok_or(ProcessError::UnknownDestination(domain))?;
		let origin = self.registry.by_domain(u64::from(event.origin_domain));

		let ctx = RuleContext::new(destination.clone(), origin);
		match self.rules.evaluate(event, &ctx).await {
			Ok(()) => {}
			Err(RuleError::Violation { rule, reason }) => {
				tracing::info!(
					chain = %destination.chain_name(),
					order_id = %event.order_id.short(),
					phase = "rule",
					rule = rule,
					reason = %reason,
					"order skipped"
				);
				return Ok(false);
			}
			Err(RuleError::Adapter(e)) => return Err(ProcessError::Rule(e)),
		}

		// A revert is final: the contract rejected this order and a
		// replay would revert again. Log it and move on; anything else
		// is retriable and keeps the cursor in place.
		let action = match destination.fill(event).await {
			Ok(action) => action,
			Err(e @ AdapterError::Reverted { .. }) => {
				tracing::error!(
					chain = %destination.chain_name(),
					order_id = %event.order_id.short(),
					phase = "fill",
					error = %e,
					"fill reverted"
				);
				return Ok(false);
			}
			Err(e) => return Err(e.into()),
		};
		match action {
			FillAction::AlreadyComplete => {
				tracing::info!(
					chain = %destination.chain_name(),
					order_id = %event.order_id.short(),
					phase = "fill",
					"order already settled"
				);
				Ok(true)
			}
			FillAction::SubmittedNeedsSettle | FillAction::AlreadyFilledNeedsSettle => {
				if let Err(e) = destination.settle(event).await {
					if matches!(e, AdapterError::Reverted { .. }) {
						tracing::error!(
							chain = %destination.chain_name(),
							order_id = %event.order_id.short(),
							phase = "settle",
							error = %e,
							"settle reverted"
						);
						return Ok(false);
					}
					return Err(e.into());
				}
				tracing::info!(
					chain = %destination.chain_name(),
					order_id = %event.order_id.short(),
					phase = "settle",
					"order filled and settled"
				);
				Ok(true)
			}
		}
	}
}

#[async_trait]
impl OpenEventHandler for IntentProcessor {
	async fn handle(&self, event: OpenEvent) -> Result<bool, HandlerError> {
		self.process(&event).await.map_err(HandlerError::from)
	}
}
