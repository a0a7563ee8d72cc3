//! Felt-VM chain adapter built on starknet-rs.
//!
//! Submissions go through a `SingleOwnerAccount`; reads are plain
//! `starknet_call` invocations. Calldata follows Cairo serde: `u256`
//! values travel as `(low, high)` felt pairs and opaque bytes as
//! length-prefixed 16-byte words. The native asset is an ordinary ERC-20
//! at a fixed, well-known address, so "attach value" on this family
//! means approving that token before the call that pulls it.

use crate::{AdapterError, AdapterInterface, RECEIPT_TIMEOUT_SECS};
use alloy_primitives::U256;
use async_trait::async_trait;
use solver_account::FeltSigner;
use solver_config::ChainConfig;
use solver_types::{
	codec, FillAction, OpenEvent, OrderId, OrderStatus, TransactionHash, TransactionReceipt,
	UniversalAddress,
};
use starknet::accounts::{Account, ExecutionEncoding, SingleOwnerAccount};
use starknet::core::types::{
	BlockId, BlockTag, Call, ExecutionResult, Felt, FunctionCall, StarknetError,
};
use starknet::macros::{felt, selector};
use starknet::providers::jsonrpc::{HttpTransport, JsonRpcClient};
use starknet::providers::{Provider, ProviderError};
use starknet::signers::LocalWallet;
use std::collections::HashMap;
use tokio::sync::Mutex;
use url::Url;

/// The canonical ETH ERC-20, the native asset's token address on every
/// supported felt chain.
pub const NATIVE_TOKEN: Felt =
	felt!("0x049d36570d4e46f48e99674bd3fcc84644ddd6b96f7c741b1562b82f9e004dc7");

/// Adapter for one felt-VM destination chain.
pub struct StarknetAdapter {
	name: String,
	domain: u32,
	provider: JsonRpcClient<HttpTransport>,
	account: SingleOwnerAccount<JsonRpcClient<HttpTransport>, LocalWallet>,
	/// Entry contract on this chain.
	settler: Felt,
	solver: Felt,
	// One in-flight signed transaction per signer at a time.
	tx_lock: Mutex<()>,
	decimals_cache: Mutex<HashMap<Felt, u8>>,
}

impl StarknetAdapter {
	/// Connects an adapter for the given chain with its signer triple.
	pub async fn connect(config: &ChainConfig, signer: &FeltSigner) -> Result<Self, AdapterError> {
		let url = Url::parse(&config.rpc_url)
			.map_err(|e| AdapterError::Network(format!("invalid RPC URL: {}", e)))?;
		let client = reqwest011::Client::builder()
			.timeout(std::time::Duration::from_secs(30))
			.build()
			.map_err(|e| AdapterError::Network(format!("http client: {}", e)))?;
		let provider = JsonRpcClient::new(HttpTransport::new_with_client(url, client));

		let chain_id = provider
			.chain_id()
			.await
			.map_err(|e| AdapterError::Network(format!("chain_id failed: {}", e)))?;

		let mut account = SingleOwnerAccount::new(
			provider.clone(),
			signer.wallet(),
			signer.address,
			chain_id,
			ExecutionEncoding::New,
		);
		account.set_block_id(BlockId::Tag(BlockTag::Pending));

		let settler = felt_from_universal(&config.hyperlane_address)?;
		Ok(Self {
			name: config.name.clone(),
			domain: config.domain,
			provider,
			account,
			settler,
			solver: signer.address,
			tx_lock: Mutex::new(()),
			decimals_cache: Mutex::new(HashMap::new()),
		})
	}

	async fn call_contract(
		&self,
		contract: Felt,
		selector: Felt,
		calldata: Vec<Felt>,
	) -> Result<Vec<Felt>, AdapterError> {
		self.provider
			.call(
				FunctionCall {
					contract_address: contract,
					entry_point_selector: selector,
					calldata,
				},
				BlockId::Tag(BlockTag::Pending),
			)
			.await
			.map_err(|e| AdapterError::Network(format!("starknet_call failed: {}", e)))
	}

	async fn status_at(&self, contract: Felt, order_id: &OrderId) -> Result<OrderStatus, AdapterError> {
		let (low, high) = order_id.u256_parts();
		let result = self
			.call_contract(
				contract,
				selector!("order_status"),
				vec![Felt::from(low), Felt::from(high)],
			)
			.await?;
		let raw = result.first().ok_or_else(|| {
			AdapterError::Network("empty order_status response".to_string())
		})?;
		Ok(status_from_felt(*raw))
	}

	/// Sends one invoke, retrying once on a nonce race.
	async fn invoke(&self, call: Call, phase: &'static str) -> Result<Felt, AdapterError> {
		match self.account.execute_v3(vec![call.clone()]).send().await {
			Ok(result) => Ok(result.transaction_hash),
			Err(first) => {
				let message = first.to_string();
				if !message.contains("nonce") && !message.contains("Nonce") {
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
				self.account
					.execute_v3(vec![call])
					.send()
					.await
					.map(|result| result.transaction_hash)
					.map_err(|e| {
						AdapterError::Network(format!("{} retry failed: {}", phase, e))
					})
			}
		}
	}

	async fn wait_for_receipt(
		&self,
		tx_hash: Felt,
		phase: &'static str,
	) -> Result<TransactionReceipt, AdapterError> {
		let poll = tokio::time::Duration::from_secs(3);
		let started = tokio::time::Instant::now();
		loop {
			if started.elapsed().as_secs() > RECEIPT_TIMEOUT_SECS {
				return Err(AdapterError::ReceiptTimeout(format!("{:#x}", tx_hash)));
			}
			match self.provider.get_transaction_receipt(tx_hash).await {
				Ok(receipt) => {
					let success = match receipt.receipt.execution_result() {
						ExecutionResult::Succeeded => true,
						ExecutionResult::Reverted { reason } => {
							return Err(AdapterError::Reverted {
								phase,
								tx_hash: format!("{:#x}", tx_hash),
								reason: reason.clone(),
							});
						}
					};
					return Ok(TransactionReceipt {
						hash: TransactionHash(tx_hash.to_bytes_be().to_vec()),
						block_number: receipt.block.block_number().unwrap_or(0),
						success,
					});
				}
				Err(ProviderError::StarknetError(StarknetError::TransactionHashNotFound)) => {
					tracing::debug!(
						chain = %self.name,
						phase = phase,
						tx_hash = %format!("{:#x}", tx_hash),
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

	async fn read_allowance(&self, token: Felt, spender: Felt) -> Result<U256, AdapterError> {
		let result = self
			.call_contract(token, selector!("allowance"), vec![self.solver, spender])
			.await?;
		u256_from_felts(&result)
	}

	async fn ensure_allowance(
		&self,
		token: Felt,
		spender: Felt,
		amount: U256,
	) -> Result<(), AdapterError> {
		if self.read_allowance(token, spender).await? >= amount {
			return Ok(());
		}

		let (low, high) = codec::u256_to_u128_pair(amount);
		tracing::info!(
			chain = %self.name,
			token = %format!("{:#x}", token),
			spender = %format!("{:#x}", spender),
			amount = %amount,
			"approving token spend"
		);
		let tx_hash = self
			.invoke(
				Call {
					to: token,
					selector: selector!("approve"),
					calldata: vec![spender, Felt::from(low), Felt::from(high)],
				},
				"approve",
			)
			.await?;
		self.wait_for_receipt(tx_hash, "approve").await?;

		if self.read_allowance(token, spender).await? < amount {
			return Err(AdapterError::Reverted {
				phase: "approve",
				tx_hash: format!("{:#x}", tx_hash),
				reason: "allowance still short after approve".to_string(),
			});
		}
		Ok(())
	}
}

fn felt_from_universal(address: &UniversalAddress) -> Result<Felt, AdapterError> {
	Ok(Felt::from_bytes_be(&address.to_felt_bytes()?))
}

/// Token reference for this family: the zero sentinel resolves to the
/// native ERC-20.
fn token_felt(token: &UniversalAddress) -> Result<Felt, AdapterError> {
	if token.is_zero() {
		Ok(NATIVE_TOKEN)
	} else {
		felt_from_universal(token)
	}
}

fn status_from_felt(raw: Felt) -> OrderStatus {
	let word = raw.to_bytes_be();
	if word[..24].iter().all(|b| *b == 0) {
		let mut tail = [0u8; 8];
		tail.copy_from_slice(&word[24..]);
		OrderStatus::from_felt_value(u64::from_be_bytes(tail))
	} else {
		OrderStatus::Other(word)
	}
}

fn felt_to_u128(raw: &Felt) -> Result<u128, AdapterError> {
	let word = raw.to_bytes_be();
	if word[..16].iter().any(|b| *b != 0) {
		return Err(AdapterError::Network(format!(
			"felt {:#x} does not fit u128",
			raw
		)));
	}
	let mut tail = [0u8; 16];
	tail.copy_from_slice(&word[16..]);
	Ok(u128::from_be_bytes(tail))
}

fn u256_from_felts(felts: &[Felt]) -> Result<U256, AdapterError> {
	if felts.len() < 2 {
		return Err(AdapterError::Network(
			"u256 response shorter than two felts".to_string(),
		));
	}
	Ok(codec::u128_pair_to_u256(
		felt_to_u128(&felts[0])?,
		felt_to_u128(&felts[1])?,
	))
}

/// `fill(order_id: u256, origin_data: Array<u128>)` calldata: the id as
/// reverse-endian halves, then the byte size and word count prefix, then
/// the 16-byte words.
fn fill_calldata(order_id: &OrderId, origin_data: &[u8]) -> Vec<Felt> {
	let (low, high) = order_id.u256_parts();
	let (byte_size, words) = codec::origin_data_to_words(origin_data);
	let mut calldata = Vec::with_capacity(4 + words.len());
	calldata.push(Felt::from(low));
	calldata.push(Felt::from(high));
	calldata.push(Felt::from(byte_size));
	calldata.push(Felt::from(words.len() as u64));
	calldata.extend(words.into_iter().map(Felt::from));
	calldata
}

/// `settle(order_ids: Array<u256>, value: u256)` calldata for a single
/// order.
fn settle_calldata(order_id: &OrderId, value: U256) -> Vec<Felt> {
	let (id_low, id_high) = order_id.u256_parts();
	let (value_low, value_high) = codec::u256_to_u128_pair(value);
	vec![
		Felt::ONE,
		Felt::from(id_low),
		Felt::from(id_high),
		Felt::from(value_low),
		Felt::from(value_high),
	]
}

#[async_trait]
impl AdapterInterface for StarknetAdapter {
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
		let settler = felt_from_universal(&instruction.destination_settler)?;

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

		// Every transfer on this family is an ERC-20 pull, the native
		// asset included; approve each leg for its exact amount.
		let mut saw_leg = false;
		for (output, leg) in event
			.resolved
			.max_spent
			.iter()
			.zip(event.resolved.fill_instructions.iter())
		{
			if leg.destination_chain_id != u64::from(self.domain) {
				continue;
			}
			saw_leg = true;
			let token = token_felt(&output.token)?;
			let spender = felt_from_universal(&leg.destination_settler)?;
			self.ensure_allowance(token, spender, output.amount).await?;
		}
		if !saw_leg {
			return Err(AdapterError::MalformedOrder(format!(
				"no outputs for domain {}",
				self.domain
			)));
		}

		let tx_hash = self
			.invoke(
				Call {
					to: settler,
					selector: selector!("fill"),
					calldata: fill_calldata(&event.order_id, &instruction.origin_data),
				},
				"fill",
			)
			.await?;
		tracing::info!(
			chain = %self.name,
			order_id = %event.order_id.short(),
			phase = "fill",
			tx_hash = %format!("{:#x}", tx_hash),
			"submitted fill"
		);
		self.wait_for_receipt(tx_hash, "fill").await?;
		Ok(FillAction::SubmittedNeedsSettle)
	}

	async fn settle(&self, event: &OpenEvent) -> Result<TransactionReceipt, AdapterError> {
		let _guard = self.tx_lock.lock().await;

		let instruction = event
			.resolved
			.fill_instructions
			.first()
			.ok_or_else(|| AdapterError::MalformedOrder("no fill instructions".to_string()))?;
		let settler = felt_from_universal(&instruction.destination_settler)?;

		let status = self.status_at(settler, &event.order_id).await?;
		if status != OrderStatus::Filled {
			return Err(AdapterError::UnexpectedStatus {
				order_id: event.order_id.to_string(),
				status: status.to_string(),
			});
		}

		let quote_raw = self
			.call_contract(
				settler,
				selector!("quote_gas_payment"),
				vec![Felt::from(event.origin_domain)],
			)
			.await?;
		let quote = u256_from_felts(&quote_raw)?;

		// The settle entry point pulls the message fee in the native
		// ERC-20; approve it for exactly the quote first.
		self.ensure_allowance(NATIVE_TOKEN, settler, quote).await?;

		let tx_hash = self
			.invoke(
				Call {
					to: settler,
					selector: selector!("settle"),
					calldata: settle_calldata(&event.order_id, quote),
				},
				"settle",
			)
			.await?;
		tracing::info!(
			chain = %self.name,
			order_id = %event.order_id.short(),
			phase = "settle",
			tx_hash = %format!("{:#x}", tx_hash),
			gas_payment = %quote,
			"submitted settle"
		);
		self.wait_for_receipt(tx_hash, "settle").await
	}

	async fn order_status(&self, order_id: &OrderId) -> Result<OrderStatus, AdapterError> {
		self.status_at(self.settler, order_id).await
	}

	async fn balance_of(&self, token: &UniversalAddress) -> Result<U256, AdapterError> {
		let token = token_felt(token)?;
		let result = self
			.call_contract(token, selector!("balance_of"), vec![self.solver])
			.await?;
		u256_from_felts(&result)
	}

	async fn token_decimals(&self, token: &UniversalAddress) -> Result<u8, AdapterError> {
		if token.is_zero() {
			return Ok(18);
		}
		let token = token_felt(token)?;
		{
			let cache = self.decimals_cache.lock().await;
			if let Some(cached) = cache.get(&token) {
				return Ok(*cached);
			}
		}
		let result = self
			.call_contract(token, selector!("decimals"), vec![])
			.await?;
		let raw = result.first().ok_or_else(|| {
			AdapterError::Network("empty decimals response".to_string())
		})?;
		let value = felt_to_u128(raw)?;
		let value = u8::try_from(value).map_err(|_| {
			AdapterError::Network(format!("decimals {} out of range", value))
		})?;
		self.decimals_cache.lock().await.insert(token, value);
		Ok(value)
	}
}

impl std::fmt::Debug for StarknetAdapter {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("StarknetAdapter")
			.field("chain", &self.name)
			.field("domain", &self.domain)
			.field("settler", &format!("{:#x}", self.settler))
			.finish()
	}
}
