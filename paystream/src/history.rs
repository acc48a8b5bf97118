//! Stream listing and history
//!
//! The ledger indexes transactions by event attribute, so a pair's history
//! arrives as one search per stream event type. A single transaction
//! usually matches several searches (a create emits both `create_stream`
//! and `stream_deposit`), so the batches are merged by hash and ordered by
//! height before the events are decoded.

use std::collections::HashSet;
use tracing::{debug, warn};

use crate::{
    error::{ReconciliationError, Unreachable},
    events::TransitionEvent,
    executor::TxReference,
    ledger::{BroadcastResult, LedgerQuery, PageRequest},
    state::StreamState,
};

/// One included transaction that touched a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTx {
    pub tx_reference: TxReference,
    /// The pair's stream events, in emission order
    pub events: Vec<TransitionEvent>,
}

impl StreamTx {
    /// Event types this transaction emitted for the pair.
    pub fn kinds(&self) -> Vec<&str> {
        self.events.iter().map(TransitionEvent::kind).collect()
    }
}

/// Merge per-event-type search results for one pair into its history.
///
/// Duplicates are dropped by hash, failed transactions are skipped, and the
/// result is ordered by height. Transactions in the same block keep the
/// order they were first seen in.
pub fn merge_history<I>(
    sender: &str,
    receiver: &str,
    batches: I,
) -> Result<Vec<StreamTx>, ReconciliationError>
where
    I: IntoIterator<Item = Vec<BroadcastResult>>,
{
    let mut seen = HashSet::new();
    let mut history = Vec::new();

    for tx in batches.into_iter().flatten() {
        if tx.code != 0 || !seen.insert(tx.tx_hash.clone()) {
            continue;
        }
        let events = TransitionEvent::decode_for_pair(&tx.events, sender, receiver)?;
        if events.is_empty() {
            continue;
        }
        history.push(StreamTx {
            tx_reference: TxReference {
                hash: tx.tx_hash,
                height: tx.height,
                block_time: tx.block_time,
            },
            events,
        });
    }

    history.sort_by_key(|tx| tx.tx_reference.height);
    Ok(history)
}

/// Walk every page of the ledger's stream list.
pub async fn list_all_streams<L>(ledger: &L, limit: u64) -> Result<Vec<StreamState>, Unreachable>
where
    L: LedgerQuery + ?Sized,
{
    let mut page = PageRequest::first(limit);
    let mut streams = Vec::new();

    loop {
        let result = ledger.query_streams(&page).await?;
        debug!(
            fetched = result.streams.len(),
            total = ?result.total,
            "fetched stream page"
        );
        streams.extend(result.streams);

        match result.next_key {
            Some(key) if page.key.as_deref() == Some(key.as_str()) => {
                warn!(%key, "ledger returned the same page key twice, stopping");
                break;
            }
            Some(key) => page = page.next(key),
            None => break,
        }
    }

    Ok(streams)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{LedgerEvent, CLAIM_STREAM, CREATE_STREAM, STREAM_DEPOSIT};

    const SENDER: &str = "und1sender";
    const RECEIVER: &str = "und1receiver";

    fn pair_event(kind: &str, receiver: &str, attrs: &[(&str, &str)]) -> LedgerEvent {
        let mut all = vec![("sender", SENDER), ("receiver", receiver)];
        all.extend_from_slice(attrs);
        LedgerEvent::new(kind, &all)
    }

    fn tx(hash: &str, height: u64, events: Vec<LedgerEvent>) -> BroadcastResult {
        BroadcastResult {
            tx_hash: hash.to_string(),
            height,
            block_time: 1_700_000_000 + height as i64,
            events,
            ..Default::default()
        }
    }

    fn create_tx() -> BroadcastResult {
        tx(
            "AA",
            10,
            vec![
                LedgerEvent::new("transfer", &[("amount", "1000nund")]),
                pair_event(CREATE_STREAM, RECEIVER, &[("flow_rate", "38051")]),
                pair_event(
                    STREAM_DEPOSIT,
                    RECEIVER,
                    &[
                        ("amount_deposited", "100000000000nund"),
                        ("deposit_zero_time", "1702628061"),
                    ],
                ),
            ],
        )
    }

    fn claim_tx(hash: &str, height: u64) -> BroadcastResult {
        tx(
            hash,
            height,
            vec![pair_event(
                CLAIM_STREAM,
                RECEIVER,
                &[
                    ("amount_received", "990nund"),
                    ("validator_fee", "10nund"),
                    ("remaining_deposit", "99999999000nund"),
                ],
            )],
        )
    }

    #[test]
    fn test_merge_dedupes_and_orders_by_height() {
        // Searches come back grouped by event type, not by height.
        let batches = vec![
            vec![create_tx()],
            vec![create_tx()],
            vec![claim_tx("CC", 30), claim_tx("BB", 20)],
        ];

        let history = merge_history(SENDER, RECEIVER, batches).unwrap();

        let hashes: Vec<_> = history.iter().map(|t| t.tx_reference.hash.as_str()).collect();
        assert_eq!(hashes, ["AA", "BB", "CC"]);
        assert_eq!(history[0].kinds(), [CREATE_STREAM, STREAM_DEPOSIT]);
        assert_eq!(history[0].tx_reference.block_time, 1_700_000_010);
        assert_eq!(history[1].kinds(), [CLAIM_STREAM]);
    }

    #[test]
    fn test_merge_skips_failed_and_other_pairs() {
        let mut failed = claim_tx("DD", 5);
        failed.code = 5;
        let other = tx(
            "EE",
            6,
            vec![pair_event(CREATE_STREAM, "und1other", &[("flow_rate", "1")])],
        );

        let history = merge_history(SENDER, RECEIVER, vec![vec![failed, other]]).unwrap();
        assert!(history.is_empty());
    }

    #[test]
    fn test_merge_fails_on_malformed_event() {
        let broken = tx(
            "FF",
            7,
            vec![pair_event(CREATE_STREAM, RECEIVER, &[("flow_rate", "fast")])],
        );

        assert!(matches!(
            merge_history(SENDER, RECEIVER, vec![vec![broken]]),
            Err(ReconciliationError::MalformedAttribute { key: "flow_rate", .. })
        ));
    }
}
