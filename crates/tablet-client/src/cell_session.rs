use crate::channel::{RegisterActionsRequest, TabletChannel};
use crate::transaction::CommitContext;
use crate::Error;
use model::CellId;
use proto_tablet::tablet::TransactionActionData;
use std::sync::{Arc, Mutex};

/// First value of a participant's accumulated signature.
pub const INITIAL_TRANSACTION_SIGNATURE: u32 = 1;

/// The accumulated signature a participant must observe before it may
/// finalize the transaction. Lost or duplicated requests leave the sum
/// short of (or past) this value, and the participant refuses to commit.
pub const FINAL_TRANSACTION_SIGNATURE: u32 = 0xffff_ffff;

/// Per-participant-cell commit state: signature accounting and custom
/// transaction actions.
pub struct CellCommitSession {
    cell_id: CellId,
    state: Mutex<State>,
}

struct State {
    requests_remaining: usize,
    current_signature: u32,
    actions: Vec<TransactionActionData>,
}

impl CellCommitSession {
    pub fn new(cell_id: CellId) -> Self {
        Self {
            cell_id,
            state: Mutex::new(State {
                requests_remaining: 0,
                current_signature: INITIAL_TRANSACTION_SIGNATURE,
                actions: Vec::new(),
            }),
        }
    }

    pub fn cell_id(&self) -> CellId {
        self.cell_id
    }

    /// Declare `count` more RPCs bound for this cell. Must cover every
    /// request that will call `allocate_request_signature`.
    pub fn register_requests(&self, count: usize) {
        self.state.lock().unwrap().requests_remaining += count;
    }

    /// Signature for the next outbound request: `1` for all but the last
    /// registered request, which carries whatever closes the gap to the
    /// terminal constant.
    pub fn allocate_request_signature(&self) -> u32 {
        let mut state = self.state.lock().unwrap();
        assert!(
            state.requests_remaining > 0,
            "more signatures allocated than requests registered"
        );
        state.requests_remaining -= 1;
        if state.requests_remaining == 0 {
            FINAL_TRANSACTION_SIGNATURE - state.current_signature
        } else {
            state.current_signature += 1;
            1
        }
    }

    /// Append a custom action; the first one reserves the extra RPC that
    /// will deliver the batch.
    pub fn register_action(&self, data: TransactionActionData) {
        let mut state = self.state.lock().unwrap();
        if state.actions.is_empty() {
            state.requests_remaining += 1;
        }
        state.actions.push(data);
    }

    /// Post registered actions to the participant, consuming one
    /// signature. A session without actions has nothing to send.
    pub(crate) async fn invoke(
        self: Arc<Self>,
        channel: Arc<dyn TabletChannel>,
        ctx: CommitContext,
    ) -> Result<(), Error> {
        let (actions, signature) = {
            let mut state = self.state.lock().unwrap();
            if state.actions.is_empty() {
                return Ok(());
            }
            let actions = std::mem::take(&mut state.actions);

            state.requests_remaining -= 1;
            let signature = if state.requests_remaining == 0 {
                FINAL_TRANSACTION_SIGNATURE - state.current_signature
            } else {
                state.current_signature += 1;
                1
            };
            (actions, signature)
        };

        tracing::debug!(
            transaction_id = %ctx.transaction_id,
            cell_id = %self.cell_id,
            actions = actions.len(),
            signature = format_args!("{signature:x}"),
            "posting transaction actions",
        );

        channel
            .register_actions(RegisterActionsRequest {
                transaction_id: ctx.transaction_id,
                transaction_start_timestamp: ctx.start_timestamp,
                transaction_timeout: ctx.timeout,
                signature,
                actions,
            })
            .await?;
        Ok(())
    }
}
