//! Intake validation. Runs before a context is created; a rejected order
//! leaves no trace in the store.

use fusionx_core::{ChainKind, DstParams, NewOrder, NodeConfig, SwapError, Timestamp};

pub fn validate_order(
    order: &NewOrder,
    config: &NodeConfig,
    now: Timestamp,
) -> Result<(), SwapError> {
    if order.src_amount == 0 {
        return Err(SwapError::MalformedOrder {
            field: "src_amount",
            reason: "must be greater than zero".into(),
        });
    }
    if order.dst_amount == 0 {
        return Err(SwapError::MalformedOrder {
            field: "dst_amount",
            reason: "must be greater than zero".into(),
        });
    }
    if order.maker.is_empty() {
        return Err(SwapError::MalformedOrder {
            field: "maker",
            reason: "must not be empty".into(),
        });
    }

    let src_kind = config
        .chain_kind(order.src_chain_id)
        .ok_or(SwapError::UnknownChain(order.src_chain_id))?;
    let dst_kind = config
        .chain_kind(order.dst_chain_id)
        .ok_or(SwapError::UnknownChain(order.dst_chain_id))?;

    if src_kind != ChainKind::Evm {
        return Err(SwapError::MalformedOrder {
            field: "src_chain_id",
            reason: format!("source must be an EVM chain, got {src_kind:?}"),
        });
    }

    let min_lead = config.execution.min_expiry_lead_secs;
    if order.expiry_time < now + min_lead {
        return Err(SwapError::ExpiryTooSoon { expiry: order.expiry_time, min_lead });
    }

    match (&order.dst_params, dst_kind) {
        (DstParams::Utxo { recipient_pubkey, timelock_blocks, .. }, ChainKind::Bitcoin) => {
            let decoded = hex::decode(recipient_pubkey).map_err(|e| SwapError::MalformedOrder {
                field: "recipient_pubkey",
                reason: e.to_string(),
            })?;
            if decoded.len() != 33 {
                return Err(SwapError::MalformedOrder {
                    field: "recipient_pubkey",
                    reason: format!("expected 33 bytes, got {}", decoded.len()),
                });
            }
            let floor = config
                .bitcoin
                .as_ref()
                .map(|b| b.min_timelock)
                .unwrap_or(fusionx_core::constants::MIN_TIMELOCK_BLOCKS);
            if *timelock_blocks < floor {
                return Err(SwapError::TimelockBelowFloor { got: *timelock_blocks, floor });
            }
        }
        (DstParams::Cosmos { recipient, denom, .. }, ChainKind::Cosmos) => {
            if recipient.is_empty() {
                return Err(SwapError::MalformedOrder {
                    field: "recipient",
                    reason: "must not be empty".into(),
                });
            }
            if denom.is_empty() {
                return Err(SwapError::MalformedOrder {
                    field: "denom",
                    reason: "must not be empty".into(),
                });
            }
        }
        (params, kind) => {
            return Err(SwapError::MalformedOrder {
                field: "dst_params",
                reason: format!("{params:?} does not match destination chain kind {kind:?}"),
            });
        }
    }
    Ok(())
}
