//! In-memory chain doubles for tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use alloy_core::primitives::{Address, B256, Bytes, U64, U256, keccak256};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, method},
};

use crate::{
    address::{AddressComputer, CREATEX_ADDRESS, Create2Deployer, DETERMINISTIC_PROXY_ADDRESS, create2_address},
    error::RpcError,
    rpc::{CallOutcome, CallRequest, ChainRpc, FeeEstimate, TransactionReceipt},
};

/// Something observable that happened on a mock chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RpcEvent {
    GetCode { chain_id: u64, address: Address },
    Simulate { chain_id: u64, from: Option<Address> },
    SendRaw { chain_id: u64, hash: B256 },
    Receipt { chain_id: u64, hash: B256 },
}

#[derive(Debug, Default)]
struct MockState {
    code: HashMap<(u64, Address), Bytes>,
    simulation_overrides: HashMap<u64, CallOutcome>,
    failing_chains: HashMap<u64, RpcError>,
    failing_receipts: HashMap<u64, RpcError>,
    reverting_chains: HashSet<u64>,
    events: Vec<RpcEvent>,
}

/// A [`ChainRpc`] double.
///
/// Simulations behave like an honest deployer unless overridden. Receipts
/// arrive after `receipt_delay` and every call is recorded as an [`RpcEvent`].
#[derive(Debug, Clone, Default)]
pub(crate) struct MockChainRpc {
    state: Arc<Mutex<MockState>>,
    receipt_delay: Duration,
}

impl MockChainRpc {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_receipt_delay(mut self, delay: Duration) -> Self {
        self.receipt_delay = delay;
        self
    }

    pub(crate) fn set_code(&self, chain_id: u64, address: Address, code: Bytes) {
        self.state.lock().unwrap().code.insert((chain_id, address), code);
    }

    pub(crate) fn set_simulation(&self, chain_id: u64, outcome: CallOutcome) {
        self.state
            .lock()
            .unwrap()
            .simulation_overrides
            .insert(chain_id, outcome);
    }

    pub(crate) fn fail_chain(&self, chain_id: u64, error: RpcError) {
        self.state.lock().unwrap().failing_chains.insert(chain_id, error);
    }

    /// Make every receipt wait on `chain_id` fail with `error`. Other calls still succeed.
    pub(crate) fn fail_receipts(&self, chain_id: u64, error: RpcError) {
        self.state.lock().unwrap().failing_receipts.insert(chain_id, error);
    }

    pub(crate) fn revert_receipts(&self, chain_id: u64) {
        self.state.lock().unwrap().reverting_chains.insert(chain_id);
    }

    pub(crate) fn events(&self) -> Vec<RpcEvent> {
        self.state.lock().unwrap().events.clone()
    }

    pub(crate) fn sent_on(&self, chain_id: u64) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, RpcEvent::SendRaw { chain_id: c, .. } if *c == chain_id))
            .count()
    }

    fn check(&self, chain_id: u64) -> Result<(), RpcError> {
        match self.state.lock().unwrap().failing_chains.get(&chain_id) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn record(&self, event: RpcEvent) {
        self.state.lock().unwrap().events.push(event);
    }
}

/// What an honest deployer at `to` would return for `data` when called by `from`.
pub(crate) fn honest_deployer_output(to: Address, from: Option<Address>, data: &[u8]) -> Option<Bytes> {
    if to == DETERMINISTIC_PROXY_ADDRESS && data.len() >= 32 {
        let salt = B256::from_slice(&data[..32]);
        let address = create2_address(to, salt, keccak256(&data[32..]));
        return Some(Bytes::copy_from_slice(address.as_slice()));
    }

    if to == CREATEX_ADDRESS && data.len() >= 100 {
        let salt = B256::from_slice(&data[4..36]);
        let len = U256::from_be_slice(&data[68..100]).to::<usize>();
        let init_code = data.get(100..100 + len)?;
        // CreateX only applies the permissioned guard when the caller matches the salt prefix.
        let guarded = AddressComputer::new(Create2Deployer::CreateX)
            .with_sender(from)
            .guarded_salt(salt)
            .ok()?;
        let address = create2_address(to, guarded, keccak256(init_code));
        return Some(Bytes::copy_from_slice(address.into_word().as_slice()));
    }

    None
}

impl ChainRpc for MockChainRpc {
    async fn get_code(&self, chain_id: u64, address: Address) -> Result<Bytes, RpcError> {
        self.check(chain_id)?;
        self.record(RpcEvent::GetCode { chain_id, address });
        Ok(self
            .state
            .lock()
            .unwrap()
            .code
            .get(&(chain_id, address))
            .cloned()
            .unwrap_or_default())
    }

    async fn call(&self, chain_id: u64, request: &CallRequest) -> Result<CallOutcome, RpcError> {
        self.check(chain_id)?;
        self.record(RpcEvent::Simulate {
            chain_id,
            from: request.from,
        });
        if let Some(outcome) = self.state.lock().unwrap().simulation_overrides.get(&chain_id) {
            return Ok(outcome.clone());
        }
        Ok(match honest_deployer_output(request.to, request.from, &request.input) {
            Some(output) => CallOutcome::Success(output),
            None => CallOutcome::Reverted {
                message: "execution reverted".to_string(),
                data: None,
            },
        })
    }

    async fn transaction_count(&self, chain_id: u64, _address: Address) -> Result<u64, RpcError> {
        self.check(chain_id)?;
        // One nonce per broadcast, good enough for a single sender.
        Ok(self.sent_on(chain_id) as u64)
    }

    async fn estimate_gas(&self, chain_id: u64, _request: &CallRequest) -> Result<u64, RpcError> {
        self.check(chain_id)?;
        Ok(100_000)
    }

    async fn fee_estimate(&self, chain_id: u64) -> Result<FeeEstimate, RpcError> {
        self.check(chain_id)?;
        Ok(FeeEstimate::from_base_fee(1_000, 100))
    }

    async fn send_raw_transaction(&self, chain_id: u64, raw: Bytes) -> Result<B256, RpcError> {
        self.check(chain_id)?;
        let hash = keccak256(&raw);
        self.record(RpcEvent::SendRaw { chain_id, hash });
        Ok(hash)
    }

    async fn wait_for_receipt(&self, chain_id: u64, hash: B256) -> Result<TransactionReceipt, RpcError> {
        tokio::time::sleep(self.receipt_delay).await;
        self.record(RpcEvent::Receipt { chain_id, hash });
        if let Some(error) = self.state.lock().unwrap().failing_receipts.get(&chain_id) {
            return Err(error.clone());
        }
        let reverted = self.state.lock().unwrap().reverting_chains.contains(&chain_id);
        Ok(TransactionReceipt {
            transaction_hash: hash,
            block_number: Some(U64::from(1)),
            status: Some(U64::from(u64::from(!reverted))),
            gas_used: Some(U64::from(21_000)),
        })
    }
}

/// Install a test subscriber once, so `tracing` output shows up in failing tests.
pub(crate) fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init()
        .ok();
}

/// Answer every JSON-RPC call of `rpc_method` on `server` with `body`.
pub(crate) async fn mock_rpc_method(server: &MockServer, rpc_method: &str, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": rpc_method })))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Base URL of `server`.
pub(crate) fn server_url(server: &MockServer) -> url::Url {
    server.uri().parse().unwrap()
}
