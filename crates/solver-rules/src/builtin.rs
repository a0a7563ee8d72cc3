//! The built-in rule chain.
//!
//! Ordering matters and is fixed by [`RulesEngine::standard`]: the route
//! policy and deadline checks are pure and run before anything that
//! costs an RPC call; the destination status lookup runs last and is
//! shared with the fill path through the context cache.
//!
//! [`RulesEngine::standard`]: crate::RulesEngine::standard

use crate::{Rule, RuleContext, RuleError};
use alloy_primitives::U256;
use async_trait::async_trait;
use solver_adapters::AdapterError;
use solver_config::RoutePattern;
use solver_types::{
	current_timestamp, format_token_amount, OpenEvent, OrderStatus, Output, UniversalAddress,
};
use std::collections::HashMap;

/// Scales an amount to a common 18-decimal basis so amounts from chains
/// with different token decimals compare meaningfully.
fn normalize_to_18(amount: U256, decimals: u8) -> U256 {
	if decimals <= 18 {
		amount * U256::from(10u64).pow(U256::from(18 - decimals))
	} else {
		amount / U256::from(10u64).pow(U256::from(decimals - 18))
	}
}

/// Legs of `max_spent` the given adapter is responsible for, paired with
/// their instructions.
fn destination_legs<'a>(
	event: &'a OpenEvent,
	domain: u32,
) -> impl Iterator<Item = &'a Output> + 'a {
	event
		.resolved
		.max_spent
		.iter()
		.zip(event.resolved.fill_instructions.iter())
		.filter(move |(_, instruction)| instruction.destination_chain_id == u64::from(domain))
		.map(|(output, _)| output)
}

/// Allow/block routing policy. The block list always wins; a non-empty
/// allow list requires membership.
pub struct RoutePolicyRule {
	block_list: Vec<RoutePattern>,
	allow_list: Vec<RoutePattern>,
}

impl RoutePolicyRule {
	/// Builds the rule from configured lists.
	pub fn new(block_list: Vec<RoutePattern>, allow_list: Vec<RoutePattern>) -> Self {
		Self {
			block_list,
			allow_list,
		}
	}
}

#[async_trait]
impl Rule for RoutePolicyRule {
	fn name(&self) -> &'static str {
		"route-policy"
	}

	async fn check(&self, event: &OpenEvent, _ctx: &RuleContext) -> Result<(), RuleError> {
		let Some(domain) = event.destination_domain() else {
			return Err(RuleError::violation(self.name(), "no fill instructions"));
		};
		let recipient = event.resolved.max_spent.first().map(|output| &output.recipient);

		if self
			.block_list
			.iter()
			.any(|pattern| pattern.matches(&event.sender, domain, recipient))
		{
			return Err(RuleError::violation(self.name(), "route is block-listed"));
		}
		if !self.allow_list.is_empty()
			&& !self
				.allow_list
				.iter()
				.any(|pattern| pattern.matches(&event.sender, domain, recipient))
		{
			return Err(RuleError::violation(
				self.name(),
				"route not on allow list",
			));
		}
		Ok(())
	}
}

/// Rejects orders whose fill deadline already passed. Cheap local clock
/// check; saves a doomed fill transaction.
pub struct FillDeadlineRule {
	clock: fn() -> u64,
}

impl FillDeadlineRule {
	/// Rule against the system clock.
	pub fn new() -> Self {
		Self {
			clock: current_timestamp,
		}
	}

	#[cfg(test)]
	fn with_clock(clock: fn() -> u64) -> Self {
		Self { clock }
	}
}

impl Default for FillDeadlineRule {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl Rule for FillDeadlineRule {
	fn name(&self) -> &'static str {
		"fill-deadline"
	}

	async fn check(&self, event: &OpenEvent, _ctx: &RuleContext) -> Result<(), RuleError> {
		let now = (self.clock)();
		if now > u64::from(event.resolved.fill_deadline) {
			return Err(RuleError::violation(
				self.name(),
				format!(
					"deadline {} already passed at {}",
					event.resolved.fill_deadline, now
				),
			));
		}
		Ok(())
	}
}

/// Requires the solver to hold every `max_spent` amount on the
/// destination, summed per token.
pub struct BalanceRule;

#[async_trait]
impl Rule for BalanceRule {
	fn name(&self) -> &'static str {
		"balance"
	}

	async fn check(&self, event: &OpenEvent, ctx: &RuleContext) -> Result<(), RuleError> {
		let domain = ctx.destination.domain();
		let mut required: HashMap<UniversalAddress, U256> = HashMap::new();
		for output in destination_legs(event, domain) {
			let entry = required.entry(output.token).or_insert(U256::ZERO);
			*entry += output.amount;
		}

		for (token, amount) in required {
			let held = ctx.destination.balance_of(&token).await?;
			if held < amount {
				return Err(RuleError::violation(
					self.name(),
					format!("need {} of {}, hold {}", amount, token, held),
				));
			}
		}
		Ok(())
	}
}

/// Allowance feasibility. The actual approval happens lazily in the
/// adapter's fill path; this rule only rejects tokens the solver cannot
/// even read metadata for, which an approve could never fix.
pub struct AllowanceRule;

#[async_trait]
impl Rule for AllowanceRule {
	fn name(&self) -> &'static str {
		"allowance"
	}

	async fn check(&self, event: &OpenEvent, ctx: &RuleContext) -> Result<(), RuleError> {
		let domain = ctx.destination.domain();
		for output in destination_legs(event, domain) {
			if output.token.is_zero() {
				continue;
			}
			if let Err(e) = ctx.destination.token_decimals(&output.token).await {
				return Err(RuleError::violation(
					self.name(),
					format!("token {} unusable: {}", output.token, e),
				));
			}
		}
		Ok(())
	}
}

/// Spread check: what the solver receives on origin must strictly exceed
/// what it spends on destination, after normalizing both sides to 18
/// decimals. Equality is a failure; zero-margin fills are not taken.
pub struct ProfitabilityRule;

#[async_trait]
impl Rule for ProfitabilityRule {
	fn name(&self) -> &'static str {
		"profitability"
	}

	async fn check(&self, event: &OpenEvent, ctx: &RuleContext) -> Result<(), RuleError> {
		let Some(origin) = &ctx.origin else {
			return Err(RuleError::violation(
				self.name(),
				format!("origin domain {} not registered", event.origin_domain),
			));
		};

		let mut spent = U256::ZERO;
		for output in destination_legs(event, ctx.destination.domain()) {
			let decimals = ctx.destination.token_decimals(&output.token).await?;
			spent += normalize_to_18(output.amount, decimals);
		}

		let mut received = U256::ZERO;
		for output in &event.resolved.min_received {
			let decimals = origin.token_decimals(&output.token).await?;
			received += normalize_to_18(output.amount, decimals);
		}

		if received <= spent {
			return Err(RuleError::violation(
				self.name(),
				format!(
					"unprofitable: receive {} <= spend {}",
					format_token_amount(received, 18),
					format_token_amount(spent, 18)
				),
			));
		}
		Ok(())
	}
}

/// Skips orders the destination already reports as settled. A `Filled`
/// status passes so settle can be re-driven; an unrecognized sentinel is
/// an error, not a skip.
pub struct NotAlreadySettledRule;

#[async_trait]
impl Rule for NotAlreadySettledRule {
	fn name(&self) -> &'static str {
		"not-already-settled"
	}

	async fn check(&self, event: &OpenEvent, ctx: &RuleContext) -> Result<(), RuleError> {
		match ctx.destination_status(&event.order_id).await? {
			OrderStatus::Settled => Err(RuleError::violation(self.name(), "already settled")),
			OrderStatus::Other(raw) => Err(RuleError::Adapter(AdapterError::UnexpectedStatus {
				order_id: event.order_id.to_string(),
				status: format!("0x{}", hex::encode(raw)),
			})),
			OrderStatus::Unknown | OrderStatus::Filled => Ok(()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::RulesEngine;
	use solver_adapters::AdapterInterface;
	use solver_types::{
		FillAction, FillInstruction, OpenEvent, OrderId, ResolvedCrossChainOrder,
		TransactionReceipt,
	};
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;

	const DEST_DOMAIN: u32 = 10066329;
	const ORIGIN_DOMAIN: u32 = 11155111;

	fn univ(byte: u8) -> UniversalAddress {
		let mut bytes = [0u8; 32];
		bytes[31] = byte;
		UniversalAddress::from_bytes(bytes)
	}

	/// Scripted adapter that counts every RPC-shaped call.
	struct MockAdapter {
		domain: u32,
		balances: HashMap<UniversalAddress, U256>,
		decimals: HashMap<UniversalAddress, u8>,
		status: OrderStatus,
		rpc_calls: AtomicUsize,
	}

	impl MockAdapter {
		fn new(domain: u32) -> Self {
			Self {
				domain,
				balances: HashMap::new(),
				decimals: HashMap::new(),
				status: OrderStatus::Unknown,
				rpc_calls: AtomicUsize::new(0),
			}
		}

		fn with_balance(mut self, token: UniversalAddress, amount: u64) -> Self {
			self.balances.insert(token, U256::from(amount));
			self
		}

		fn with_decimals(mut self, token: UniversalAddress, decimals: u8) -> Self {
			self.decimals.insert(token, decimals);
			self
		}

		fn with_status(mut self, status: OrderStatus) -> Self {
			self.status = status;
			self
		}

		fn calls(&self) -> usize {
			self.rpc_calls.load(Ordering::SeqCst)
		}
	}

	#[async_trait]
	impl AdapterInterface for MockAdapter {
		fn chain_name(&self) -> &str {
			"mock"
		}
		fn domain(&self) -> u32 {
			self.domain
		}
		async fn fill(&self, _event: &OpenEvent) -> Result<FillAction, AdapterError> {
			unimplemented!("rules never fill")
		}
		async fn settle(&self, _event: &OpenEvent) -> Result<TransactionReceipt, AdapterError> {
			unimplemented!("rules never settle")
		}
		async fn order_status(&self, _order_id: &OrderId) -> Result<OrderStatus, AdapterError> {
			self.rpc_calls.fetch_add(1, Ordering::SeqCst);
			Ok(self.status)
		}
		async fn balance_of(&self, token: &UniversalAddress) -> Result<U256, AdapterError> {
			self.rpc_calls.fetch_add(1, Ordering::SeqCst);
			Ok(self.balances.get(token).copied().unwrap_or(U256::ZERO))
		}
		async fn token_decimals(&self, token: &UniversalAddress) -> Result<u8, AdapterError> {
			self.rpc_calls.fetch_add(1, Ordering::SeqCst);
			self.decimals
				.get(token)
				.copied()
				.ok_or_else(|| AdapterError::Network("no such token".to_string()))
		}
	}

	fn event(spend: u64, receive: u64) -> OpenEvent {
		OpenEvent {
			order_id: OrderId::from_bytes([9u8; 32]),
			sender: univ(0x01),
			origin_chain: "sepolia".to_string(),
			origin_domain: ORIGIN_DOMAIN,
			resolved: ResolvedCrossChainOrder {
				origin_chain_id: 11155111,
				open_deadline: None,
				fill_deadline: u32::MAX,
				max_spent: vec![Output {
					token: univ(0xa0),
					amount: U256::from(spend),
					recipient: univ(0x02),
					chain_id: u64::from(DEST_DOMAIN),
				}],
				min_received: vec![Output {
					token: univ(0xb0),
					amount: U256::from(receive),
					recipient: univ(0x01),
					chain_id: u64::from(ORIGIN_DOMAIN),
				}],
				fill_instructions: vec![FillInstruction {
					destination_chain_id: u64::from(DEST_DOMAIN),
					destination_settler: univ(0x55),
					origin_data: vec![1, 2, 3],
				}],
			},
			block_number: 100,
			log_index: 0,
		}
	}

	fn ctx(destination: Arc<MockAdapter>, origin: Option<Arc<MockAdapter>>) -> RuleContext {
		RuleContext::new(
			destination,
			origin.map(|o| o as Arc<dyn AdapterInterface>),
		)
	}

	#[test]
	fn normalization_scales_both_directions() {
		assert_eq!(
			normalize_to_18(U256::from(5u64), 6),
			U256::from(5u64) * U256::from(10u64).pow(U256::from(12u64))
		);
		assert_eq!(normalize_to_18(U256::from(5u64), 18), U256::from(5u64));
		assert_eq!(
			normalize_to_18(U256::from(5_000_000u64), 24),
			U256::from(5u64)
		);
	}

	#[tokio::test]
	async fn block_list_rejects_before_any_rpc() {
		let destination = Arc::new(MockAdapter::new(DEST_DOMAIN));
		let config = solver_config::Config {
			chains: Default::default(),
			evm_private_key: None,
			state_file: "/tmp/state.json".into(),
			block_list: vec![RoutePattern::parse("*:10066329:*").unwrap()],
			allow_list: vec![],
		};
		let engine = RulesEngine::standard(&config);

		let err = engine
			.evaluate(&event(10, 20), &ctx(destination.clone(), None))
			.await
			.unwrap_err();
		assert!(matches!(err, RuleError::Violation { rule: "route-policy", .. }));
		// Short-circuited: nothing downstream touched the chain.
		assert_eq!(destination.calls(), 0);
	}

	#[tokio::test]
	async fn nonempty_allow_list_requires_membership() {
		let rule = RoutePolicyRule::new(
			vec![],
			vec![RoutePattern::parse("*:999:*").unwrap()],
		);
		let destination = Arc::new(MockAdapter::new(DEST_DOMAIN));
		let err = rule
			.check(&event(10, 20), &ctx(destination, None))
			.await
			.unwrap_err();
		assert!(matches!(err, RuleError::Violation { .. }));
	}

	#[tokio::test]
	async fn expired_deadline_is_a_violation() {
		let rule = FillDeadlineRule::with_clock(|| 5_000_000_000);
		let destination = Arc::new(MockAdapter::new(DEST_DOMAIN));
		let err = rule
			.check(&event(10, 20), &ctx(destination, None))
			.await
			.unwrap_err();
		assert!(matches!(err, RuleError::Violation { rule: "fill-deadline", .. }));
	}

	#[tokio::test]
	async fn balance_shortfall_is_a_violation() {
		let token = univ(0xa0);
		let destination = Arc::new(MockAdapter::new(DEST_DOMAIN).with_balance(token, 5));
		let err = BalanceRule
			.check(&event(10, 20), &ctx(destination, None))
			.await
			.unwrap_err();
		assert!(matches!(err, RuleError::Violation { rule: "balance", .. }));
	}

	#[tokio::test]
	async fn balance_sums_legs_of_the_same_token() {
		let token = univ(0xa0);
		let mut two_legs = event(10, 20);
		let extra = two_legs.resolved.max_spent[0].clone();
		two_legs.resolved.max_spent.push(extra);
		two_legs
			.resolved
			.fill_instructions
			.push(two_legs.resolved.fill_instructions[0].clone());

		// 15 covers each leg alone but not both.
		let destination = Arc::new(MockAdapter::new(DEST_DOMAIN).with_balance(token, 15));
		let err = BalanceRule
			.check(&two_legs, &ctx(destination, None))
			.await
			.unwrap_err();
		assert!(matches!(err, RuleError::Violation { .. }));
	}

	#[tokio::test]
	async fn unreadable_token_fails_allowance_feasibility() {
		let destination = Arc::new(MockAdapter::new(DEST_DOMAIN));
		let err = AllowanceRule
			.check(&event(10, 20), &ctx(destination, None))
			.await
			.unwrap_err();
		assert!(matches!(err, RuleError::Violation { rule: "allowance", .. }));
	}

	#[tokio::test]
	async fn equal_normalized_amounts_are_unprofitable() {
		let spend_token = univ(0xa0);
		let receive_token = univ(0xb0);
		// 10 units at 6 decimals vs 10^13 units at 18 decimals: equal
		// after normalization, so the fill must be refused.
		let destination =
			Arc::new(MockAdapter::new(DEST_DOMAIN).with_decimals(spend_token, 6));
		let origin = Arc::new(MockAdapter::new(ORIGIN_DOMAIN).with_decimals(receive_token, 18));

		let err = ProfitabilityRule
			.check(
				&event(10, 10_000_000_000_000),
				&ctx(destination.clone(), Some(origin.clone())),
			)
			.await
			.unwrap_err();
		assert!(matches!(err, RuleError::Violation { rule: "profitability", .. }));

		// One extra base unit on the receive side flips it.
		ProfitabilityRule
			.check(
				&event(10, 10_000_000_000_001),
				&ctx(destination, Some(origin)),
			)
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn missing_origin_adapter_blocks_profitability() {
		let destination =
			Arc::new(MockAdapter::new(DEST_DOMAIN).with_decimals(univ(0xa0), 6));
		let err = ProfitabilityRule
			.check(&event(10, 20), &ctx(destination, None))
			.await
			.unwrap_err();
		assert!(matches!(err, RuleError::Violation { .. }));
	}

	#[tokio::test]
	async fn settled_orders_are_skipped_filled_pass() {
		let settled = Arc::new(MockAdapter::new(DEST_DOMAIN).with_status(OrderStatus::Settled));
		let err = NotAlreadySettledRule
			.check(&event(10, 20), &ctx(settled, None))
			.await
			.unwrap_err();
		assert!(matches!(err, RuleError::Violation { .. }));

		let filled = Arc::new(MockAdapter::new(DEST_DOMAIN).with_status(OrderStatus::Filled));
		NotAlreadySettledRule
			.check(&event(10, 20), &ctx(filled, None))
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn unrecognized_status_is_an_error_not_a_skip() {
		let mut raw = [0u8; 32];
		raw[0] = 0x99;
		let odd = Arc::new(MockAdapter::new(DEST_DOMAIN).with_status(OrderStatus::Other(raw)));
		let err = NotAlreadySettledRule
			.check(&event(10, 20), &ctx(odd, None))
			.await
			.unwrap_err();
		assert!(matches!(err, RuleError::Adapter(_)));
	}

	#[tokio::test]
	async fn status_lookup_is_cached_per_invocation() {
		let destination = Arc::new(MockAdapter::new(DEST_DOMAIN));
		let context = ctx(destination.clone(), None);
		let order_id = OrderId::from_bytes([9u8; 32]);

		context.destination_status(&order_id).await.unwrap();
		context.destination_status(&order_id).await.unwrap();
		assert_eq!(destination.calls(), 1);
	}
}
