//! Two-level scheduler handoff with light-state restore.
//!
//! A [`ContextStack`] owns two schedulers. `Base` runs the normal
//! programming; `Push` pauses it, samples the lights, and hands the
//! installation to `Extra` so an operator can take over without
//! disturbing what Base will come back to. `Pop` restores the sampled
//! state and resumes Base.

use crate::device::{self, LightColors, LightDevice, LightReader, LightWriter};
use crate::lights::LightSet;
use crate::scheduler::LightScheduler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// How long to wait after pausing Base before sampling, so fades from
/// just-finished programs have landed.
const SETTLE_DELAY: Duration = Duration::from_millis(500);

enum State {
    Idle,
    Pushed(LightColors),
}

/// Serialized Push/Pop coordination over a pair of schedulers.
///
/// Push and Pop block until the handoff is complete and serialize
/// against each other; a single coordinator task processes one
/// request at a time. Exactly one of the two schedulers accepts work
/// between a matched Push/Pop pair, and Base is the active one
/// whenever no Push is outstanding.
pub struct ContextStack {
    base: Arc<LightScheduler>,
    extra: Arc<LightScheduler>,
    push_tx: mpsc::Sender<oneshot::Sender<()>>,
    pop_tx: mpsc::Sender<oneshot::Sender<()>>,
}

impl ContextStack {
    /// Builds the stack and starts its coordinator. `all_lights` is
    /// the explicit set of lights the stack samples and restores;
    /// `extra` is paused until the first push.
    pub fn new<D>(
        base: Arc<LightScheduler>,
        extra: Arc<LightScheduler>,
        device: Arc<D>,
        all_lights: LightSet,
    ) -> Self
    where
        D: LightDevice + 'static,
    {
        let reader: Arc<dyn LightReader> = device.clone();
        let writer: Arc<dyn LightWriter> = device;
        let (push_tx, push_rx) = mpsc::channel(1);
        let (pop_tx, pop_rx) = mpsc::channel(1);
        extra.pause();
        tokio::spawn(coordinator(
            base.clone(),
            extra.clone(),
            reader,
            writer,
            all_lights,
            push_rx,
            pop_rx,
        ));
        Self {
            base,
            extra,
            push_tx,
            pop_tx,
        }
    }

    pub fn base(&self) -> &Arc<LightScheduler> {
        &self.base
    }

    pub fn extra(&self) -> &Arc<LightScheduler> {
        &self.extra
    }

    /// Pauses Base, snapshots the managed lights, and activates
    /// Extra. Returns once the caller owns Extra.
    pub async fn push(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.push_tx.send(ack_tx).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Pauses Extra, restores the snapshot taken at the matching
    /// push, and resumes Base. Returns once Base is active again. A
    /// pop with no outstanding push waits for the next push to
    /// complete first.
    pub async fn pop(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.pop_tx.send(ack_tx).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn coordinator(
    base: Arc<LightScheduler>,
    extra: Arc<LightScheduler>,
    reader: Arc<dyn LightReader>,
    writer: Arc<dyn LightWriter>,
    all_lights: LightSet,
    mut push_rx: mpsc::Receiver<oneshot::Sender<()>>,
    mut pop_rx: mpsc::Receiver<oneshot::Sender<()>>,
) {
    let mut state = State::Idle;
    loop {
        state = match state {
            State::Idle => {
                let Some(ack) = push_rx.recv().await else {
                    return;
                };
                base.pause();
                tokio::time::sleep(SETTLE_DELAY).await;
                let snapshot = device::snapshot(reader.as_ref(), &all_lights).await;
                debug!("Sampled {} lights for handoff", snapshot.len());
                extra.resume();
                let _ = ack.send(());
                State::Pushed(snapshot)
            }
            State::Pushed(snapshot) => {
                let Some(ack) = pop_rx.recv().await else {
                    return;
                };
                extra.pause();
                if !snapshot.is_empty() {
                    device::restore(writer.as_ref(), &snapshot).await;
                }
                base.resume();
                let _ = ack.send(());
                State::Idle
            }
        };
    }
}
