//! EVM chain adapter built on Alloy.
//!
//! Uses a wallet-filled HTTP provider for submissions and plain `eth_call`
//! reads for status, balance, and allowance lookups. The ERC-7683 entry
//! contract ABI is declared with `sol!`; ERC-20 approvals are always for
//! the exact amount a fill requires, never for the maximum.

use crate::{AdapterError, AdapterInterface, RECEIPT_TIMEOUT_SECS};
use alloy_network::EthereumWallet;
use alloy_primitives::{Address, Bytes, FixedBytes, U256};
use alloy_provider::{Provider, ProviderBuilder};
use alloy_rpc_types::TransactionRequest;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{sol, SolCall};
use alloy_transport_http::Http;
use async_trait::async_trait;
use solver_config::ChainConfig;
use solver_types::{
	FillAction, OpenEvent, OrderId, OrderStatus, Output, TransactionHash, TransactionReceipt,
	UniversalAddress,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

sol! {
	function balanceOf(address owner) external view returns (uint256);
	function allowance(address owner, address spender) external view returns (uint256);
	function approve(address spender, uint256 value) external returns (bool);
	function decimals() external view returns (uint8);

	function fill(bytes32 orderId, bytes originData, bytes fillerData) external payable;
	function settle(bytes32[] orderIds) external payable;
	function orderStatus(bytes32 orderId) external view returns (bytes32);
	function quoteGasPayment(uint32 destinationDomain) external view returns (uint256);
}

/// Adapter for one EVM destination chain.
pub struct EvmAdapter {
	name: String,
	domain: u32,
	chain_id: u64,
	provider: Arc<dyn Provider<Http<reqwest::Client>> + Send + Sync>,
	/// Entry contract on this chain, used for bare status lookups.
	settler: Address,
	/// The solver's own address, owner side of balance and allowance reads.
	solver: Address,
	// Held across every fill or settle, including receipt waits. One
	// in-flight signed transaction per signer at a time.
	tx_lock: Mutex<()>,
	decimals_cache: Mutex<HashMap<Address, u8>>,
}

impl EvmAdapter {
	/// Connects an adapter for the given chain with its scoped signer.
	pub fn connect(config: &ChainConfig, signer: PrivateKeySigner) -> Result<Self, AdapterError> {
		let solver = signer.address();
		let wallet = EthereumWallet::from(signer);
		let url = config
			.rpc_url
			.parse()
			.map_err(|e| AdapterError::Network(format!("invalid RPC URL: {}", e)))?;
		let provider = ProviderBuilder::new()
			.with_recommended_fillers()
			.wallet(wallet)
			.on_http(url);

		Ok(Self {
			name: config.name.clone(),
			domain: config.domain,
			chain_id: config.chain_id,
			provider: Arc::new(provider),
			settler: config.hyperlane_address.to_evm()?,
			solver,
			tx_lock: Mutex::new(()),
			decimals_cache: Mutex::new(HashMap::new()),
		})
	}

	async fn call_contract(&self, to: Address, data: Vec<u8>) -> Result<Bytes, AdapterError> {
		self.provider
			.call(&TransactionRequest::default().to(to).input(data.into()))
			.await
			.map_err(|e| AdapterError::Network(format!("eth_call failed: {}", e)))
	}

	async fn status_at(&self, contract: Address, order_id: &OrderId) -> Result<OrderStatus, AdapterError> {
		let data = orderStatusCall {
			orderId: FixedBytes(*order_id.as_bytes()),
		}
		.abi_encode();
		let raw = self.call_contract(contract, data).await?;
		let word = orderStatusCall::abi_decode_returns(&raw, true)
			.map_err(|e| AdapterError::Network(format!("bad orderStatus response: {}", e)))?
			._0;
		Ok(OrderStatus::from_evm_word(word.0))
	}

	/// Submits a transaction, retrying once on a nonce collision with
	/// refreshed account state.
	async fn submit(
		&self,
		request: TransactionRequest,
		phase: &'static str,
	) -> Result<FixedBytes<32>, AdapterError> {
		match self.provider.send_transaction(request.clone()).await {
			Ok(pending) => Ok(*pending.tx_hash()),
			Err(first) => {
				let message = first.to_string();
				if !message.contains("nonce") && !message.contains("already known") {
					return Err(AdapterError::Network(format!(
						"{} submission failed: {}",
						phase, message
					)));
				}
				tracing::warn!(
					chain = %self.name,
					phase = phase,
					"nonce collision, retrying with refreshed state"
				);
				self.provider
					.send_transaction(request)
					.await
					.map(|pending| *pending.tx_hash())
					.map_err(|e| {
						AdapterError::Network(format!("{} retry failed: {}", phase, e))
					})
			}
		}
	}

	async fn wait_for_receipt(
		&self,
		tx_hash: FixedBytes<32>,
		phase: &'static str,
	) -> Result<TransactionReceipt, AdapterError> {
		let poll = tokio::time::Duration::from_secs(7);
		let started = tokio::time::Instant::now();
		loop {
			if started.elapsed().as_secs() > RECEIPT_TIMEOUT_SECS {
				return Err(AdapterError::ReceiptTimeout(format!("0x{:x}", tx_hash)));
			}
			match self.provider.get_transaction_receipt(tx_hash).await {
				Ok(Some(receipt)) => {
					return Ok(TransactionReceipt {
						hash: TransactionHash(receipt.transaction_hash.0.to_vec()),
						block_number: receipt.block_number.unwrap_or(0),
						success: receipt.status(),
					});
				}
				Ok(None) => {
					tracing::debug!(
						chain = %self.name,
						phase = phase,
						tx_hash = %format!("0x{:x}", tx_hash),
						elapsed_secs = started.elapsed().as_secs(),
						"waiting for receipt"
					);
				}
				Err(e) => {
					return Err(AdapterError::Network(format!(
						"receipt lookup failed: {}",
						e
					)));
				}
			}
			tokio::time::sleep(poll).await;
		}
	}

	/// Tops the settler's allowance up to exactly what the fill needs.
	async fn ensure_allowance(
		&self,
		token: Address,
		spender: Address,
		amount: U256,
	) -> Result<(), AdapterError> {
		let data = allowanceCall {
			owner: self.solver,
			spender,
		}
		.abi_encode();
		let raw = self.call_contract(token, data).await?;
		let current = allowanceCall::abi_decode_returns(&raw, true)
			.map_err(|e| AdapterError::Network(format!("bad allowance response: {}", e)))?
			._0;
		if current >= amount {
			return Ok(());
		}

		tracing::info!(
			chain = %self.name,
			token = %token,
			spender = %spender,
			amount = %amount,
			"approving token spend"
		);
		let request = TransactionRequest::default()
			.to(token)
			.input(approve_calldata(spender, amount).into());
		let tx_hash = self.submit(request, "approve").await?;
		let receipt = self.wait_for_receipt(tx_hash, "approve").await?;
		if !receipt.success {
			return Err(AdapterError::Reverted {
				phase: "approve",
				tx_hash: receipt.hash.to_string(),
				reason: "approve reverted".to_string(),
			});
		}

		// The token may take a fee or clamp; a fill against a short
		// allowance would revert anyway, so abort here.
		let raw = self
			.call_contract(
				token,
				allowanceCall {
					owner: self.solver,
					spender,
				}
				.abi_encode(),
			)
			.await?;
		let after = allowanceCall::abi_decode_returns(&raw, true)
			.map_err(|e| AdapterError::Network(format!("bad allowance response: {}", e)))?
			._0;
		if after < amount {
			return Err(AdapterError::Reverted {
				phase: "approve",
				tx_hash: String::new(),
				reason: format!("allowance still short: {} < {}", after, amount),
			});
		}
		Ok(())
	}
}

/// Exact-amount approve calldata. Never approve-for-max.
fn approve_calldata(spender: Address, amount: U256) -> Vec<u8> {
	approveCall {
		spender,
		value: amount,
	}
	.abi_encode()
}

/// Outputs the solver must provide on the given destination domain,
/// paired positionally with their fill instructions.
fn destination_outputs(event: &OpenEvent, domain: u32) -> Vec<(&Output, &solver_types::FillInstruction)> {
	event
		.resolved
		.max_spent
		.iter()
		.zip(event.resolved.fill_instructions.iter())
		.filter(|(_, instruction)| instruction.destination_chain_id == u64::from(domain))
		.collect()
}

/// Total native value the fill transaction must carry.
fn native_value(outputs: &[(&Output, &solver_types::FillInstruction)]) -> U256 {
	outputs
		.iter()
		.filter(|(output, _)| output.token.is_zero())
		.fold(U256::ZERO, |acc, (output, _)| acc + output.amount)
}

#[async_trait]
impl AdapterInterface for EvmAdapter {
	fn chain_name(&self) -> &str {
		&self.name
	}

	fn domain(&self) -> u32 {
		self.domain
	}

	async fn fill(&self, event: &OpenEvent) -> Result<FillAction, AdapterError> {
		let _guard = self.tx_lock.lock().await;

		let instruction = event
			.resolved
			.fill_instructions
			.first()
			.ok_or_else(|| AdapterError::MalformedOrder("no fill instructions".to_string()))?;
		let settler = instruction.destination_settler.to_evm()?;

		// The contract is the source of truth; re-derive what remains.
		match self.status_at(settler, &event.order_id).await? {
			OrderStatus::Unknown => {}
			OrderStatus::Filled => return Ok(FillAction::AlreadyFilledNeedsSettle),
			OrderStatus::Settled => return Ok(FillAction::AlreadyComplete),
			status @ OrderStatus::Other(_) => {
				return Err(AdapterError::UnexpectedStatus {
					order_id: event.order_id.to_string(),
					status: status.to_string(),
				});
			}
		}

		let legs = destination_outputs(event, self.domain);
		if legs.is_empty() {
			return Err(AdapterError::MalformedOrder(format!(
				"no outputs for domain {}",
				self.domain
			)));
		}
		for (output, leg_instruction) in &legs {
			if let Some(token) = solver_types::order::output_token_evm(output)? {
				let spender = leg_instruction.destination_settler.to_evm()?;
				self.ensure_allowance(token, spender, output.amount).await?;
			}
		}

		let calldata = fillCall {
			orderId: FixedBytes(*event.order_id.as_bytes()),
			originData: Bytes::from(instruction.origin_data.clone()),
			fillerData: Bytes::new(),
		}
		.abi_encode();
		let request = TransactionRequest::default()
			.to(settler)
			.input(calldata.into())
			.value(native_value(&legs));

		let tx_hash = self.submit(request, "fill").await?;
		tracing::info!(
			chain = %self.name,
			order_id = %event.order_id.short(),
			phase = "fill",
			tx_hash = %format!("0x{:x}", tx_hash),
			"submitted fill"
		);
		let receipt = self.wait_for_receipt(tx_hash, "fill").await?;
		if !receipt.success {
			return Err(AdapterError::Reverted {
				phase: "fill",
				tx_hash: receipt.hash.to_string(),
				reason: "execution reverted".to_string(),
			});
		}
		Ok(FillAction::SubmittedNeedsSettle)
	}

	async fn settle(&self, event: &OpenEvent) -> Result<TransactionReceipt, AdapterError> {
		let _guard = self.tx_lock.lock().await;

		let instruction = event
			.resolved
			.fill_instructions
			.first()
			.ok_or_else(|| AdapterError::MalformedOrder("no fill instructions".to_string()))?;
		let settler = instruction.destination_settler.to_evm()?;

		// Anything but FILLED here means a double-settle or an external
		// settlement; both are hard stops.
		let status = self.status_at(settler, &event.order_id).await?;
		if status != OrderStatus::Filled {
			return Err(AdapterError::UnexpectedStatus {
				order_id: event.order_id.to_string(),
				status: status.to_string(),
			});
		}

		// The message fee is quoted against the origin's Hyperlane
		// domain, which the order payload carries; the chain id would
		// quote the wrong route.
		let quote_data = quoteGasPaymentCall {
			destinationDomain: event.origin_domain,
		}
		.abi_encode();
		let raw = self.call_contract(settler, quote_data).await?;
		let quote = quoteGasPaymentCall::abi_decode_returns(&raw, true)
			.map_err(|e| AdapterError::Network(format!("bad quoteGasPayment response: {}", e)))?
			._0;

		let calldata = settleCall {
			orderIds: vec![FixedBytes(*event.order_id.as_bytes())],
		}
		.abi_encode();
		let request = TransactionRequest::default()
			.to(settler)
			.input(calldata.into())
			.value(quote);

		let tx_hash = self.submit(request, "settle").await?;
		tracing::info!(
			chain = %self.name,
			order_id = %event.order_id.short(),
			phase = "settle",
			tx_hash = %format!("0x{:x}", tx_hash),
			gas_payment = %quote,
			"submitted settle"
		);
		let receipt = self.wait_for_receipt(tx_hash, "settle").await?;
		if !receipt.success {
			return Err(AdapterError::Reverted {
				phase: "settle",
				tx_hash: receipt.hash.to_string(),
				reason: "execution reverted".to_string(),
			});
		}
		Ok(receipt)
	}

	async fn order_status(&self, order_id: &OrderId) -> Result<OrderStatus, AdapterError> {
		self.status_at(self.settler, order_id).await
	}

	async fn balance_of(&self, token: &UniversalAddress) -> Result<U256, AdapterError> {
		if token.is_zero() {
			return self
				.provider
				.get_balance(self.solver)
				.await
				.map_err(|e| AdapterError::Network(format!("get_balance failed: {}", e)));
		}
		let token = token.to_evm()?;
		let raw = self
			.call_contract(token, balanceOfCall { owner: self.solver }.abi_encode())
			.await?;
		Ok(balanceOfCall::abi_decode_returns(&raw, true)
			.map_err(|e| AdapterError::Network(format!("bad balanceOf response: {}", e)))?
			._0)
	}

	async fn token_decimals(&self, token: &UniversalAddress) -> Result<u8, AdapterError> {
		if token.is_zero() {
			return Ok(18);
		}
		let address = token.to_evm()?;
		{
			let cache = self.decimals_cache.lock().await;
			if let Some(cached) = cache.get(&address) {
				return Ok(*cached);
			}
		}
		let raw = self
			.call_contract(address, decimalsCall {}.abi_encode())
			.await?;
		let value = decimalsCall::abi_decode_returns(&raw, true)
			.map_err(|e| AdapterError::Network(format!("bad decimals response: {}", e)))?
			._0;
		self.decimals_cache.lock().await.insert(address, value);
		Ok(value)
	}
}

impl std::fmt::Debug for EvmAdapter {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EvmAdapter")
			.field("chain", &self.name)
			.field("domain", &self.domain)
			.field("chain_id", &self.chain_id)
			.field("solver", &self.solver)
			.finish()
	}
}
