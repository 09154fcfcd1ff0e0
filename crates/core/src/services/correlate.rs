//! Extrinsic/event correlation and call flattening.
//!
//! Every event carries a dispatch phase naming the extrinsic it was applied
//! under (or a non-extrinsic phase). Correlation partitions the block's flat
//! event list into per-extrinsic subsets, preserving emission order, and
//! derives each extrinsic's success flag from its subset.

use crate::models::Call;
use crate::ports::{EventPhase, RawBlock, RawCall, RawEvent, RawExtrinsic};

/// One extrinsic together with the events it emitted.
#[derive(Debug)]
pub struct WrappedExtrinsic<'a> {
    /// Index within the block.
    pub index: u32,
    /// The raw extrinsic.
    pub extrinsic: &'a RawExtrinsic,
    /// Events applied under this extrinsic, in emission order.
    pub events: Vec<&'a RawEvent>,
    /// True iff the subset contains `System.ExtrinsicSuccess`.
    pub success: bool,
}

/// Partition a block's events by originating extrinsic.
///
/// Events with `Initialization`, `Finalization`, or `Unknown` phases match
/// no extrinsic and are excluded from every subset; an extrinsic with zero
/// correlated events is never successful.
pub fn wrap_extrinsics(block: &RawBlock) -> Vec<WrappedExtrinsic<'_>> {
    block
        .extrinsics
        .iter()
        .enumerate()
        .map(|(idx, extrinsic)| {
            let events: Vec<&RawEvent> = block
                .events
                .iter()
                .filter(|evt| evt.phase == EventPhase::ApplyExtrinsic(idx as u32))
                .collect();
            let success = events
                .iter()
                .any(|evt| evt.pallet == "System" && evt.name == "ExtrinsicSuccess");
            WrappedExtrinsic {
                index: idx as u32,
                extrinsic,
                events,
                success,
            }
        })
        .collect()
}

/// Flatten an extrinsic's call tree into [`Call`] records.
///
/// The top-level call gets index 0; nested sub-calls (batch/proxy-style
/// composition) follow in depth-first order, all referencing the same
/// parent extrinsic.
pub fn flatten_calls(extrinsic_id: &str, extrinsic: &RawExtrinsic) -> Vec<Call> {
    let mut calls = Vec::with_capacity(1 + extrinsic.sub_calls.len());
    let mut next_index = 0u32;

    push_call(
        &mut calls,
        &mut next_index,
        extrinsic_id,
        &extrinsic.pallet,
        &extrinsic.call,
        &extrinsic.args,
    );
    for sub in &extrinsic.sub_calls {
        push_subtree(&mut calls, &mut next_index, extrinsic_id, sub);
    }

    calls
}

fn push_subtree(calls: &mut Vec<Call>, next_index: &mut u32, extrinsic_id: &str, call: &RawCall) {
    push_call(
        calls,
        next_index,
        extrinsic_id,
        &call.pallet,
        &call.call,
        &call.args,
    );
    for sub in &call.sub_calls {
        push_subtree(calls, next_index, extrinsic_id, sub);
    }
}

fn push_call(
    calls: &mut Vec<Call>,
    next_index: &mut u32,
    extrinsic_id: &str,
    pallet: &str,
    call: &str,
    args: &serde_json::Value,
) {
    let index = *next_index;
    *next_index += 1;
    calls.push(Call {
        id: format!("{}-{}", extrinsic_id, index),
        extrinsic_id: extrinsic_id.to_string(),
        index,
        pallet: pallet.to_string(),
        call: call.to_string(),
        args: args.clone(),
    });
}
