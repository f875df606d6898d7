//! Consumer group membership state machine
//!
//! The membership manager tracks this member's place in the group and drives
//! reconciliation of the assignment the coordinator hands out. It is confined
//! to the background thread and changes state only in response to processed
//! events: subscription changes, caller polls, heartbeat outcomes, callback
//! completions and leave requests.
//!
//! ## States
//!
//! ```text
//!                 ┌───────────────────────────────────────────────┐
//!                 ▼                                               │
//! UNSUBSCRIBED ─► JOINING ─► RECONCILING ─► ACKNOWLEDGING ─► STABLE
//!                    ▲            ▲                             │
//!                    │            └──── new target assignment ──┘
//!                  FENCED (after partitions are released)
//!
//! any active state ─► PREPARE_LEAVING ─► LEAVING ─► UNSUBSCRIBED
//! any state        ─► FATAL
//! ```
//!
//! Every transition is checked against [`MemberState::valid_previous_states`].
//!
//! ## Reconciliation
//!
//! Applying a new target assignment runs in stages, each of which may wait on
//! something outside this thread:
//!
//! 1. auto-commit of consumed offsets if partitions are being revoked
//! 2. `onPartitionsRevoked` callback on the caller thread
//! 3. apply the assignment to the subscription state
//! 4. `onPartitionsAssigned` callback for newly added partitions
//!
//! [`MembershipManager::maybe_reconcile`] advances as far as it can on each
//! call and is invoked on every poll and every background loop iteration.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::consumer::constants::{JOIN_GROUP_MEMBER_EPOCH, LEAVE_GROUP_MEMBER_EPOCH};
use crate::consumer::error::{ConsumerError, Result};
use crate::consumer::events::{
    BackgroundEvent, BackgroundEventHandler, BackgroundEventType, EventHandle,
    RebalanceCallbackCompleted, RebalanceCallbackMethod, RebalanceCallbackNeeded,
};
use crate::consumer::future::CompletableFuture;
use crate::consumer::managers::{CommitRequestManager, HeartbeatOutcome, MemberSnapshot};
use crate::consumer::subscription::SubscriptionState;
use crate::consumer::time::{calculate_deadline, Clock};
use crate::consumer::types::TopicPartition;

/// Group member state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberState {
    /// Not part of the group
    Unsubscribed,
    /// Joining with epoch 0, waiting for a first assignment
    Joining,
    /// Applying a target assignment
    Reconciling,
    /// Assignment applied, waiting for the heartbeat that acknowledges it
    Acknowledging,
    /// Assignment acknowledged
    Stable,
    /// Epoch rejected by the coordinator; partitions are being released
    Fenced,
    /// Leave requested; revocation callback running
    PrepareLeaving,
    /// Waiting for the leave heartbeat to be sent
    Leaving,
    /// Unrecoverable error
    Fatal,
}

use MemberState::*;

impl MemberState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unsubscribed => "UNSUBSCRIBED",
            Joining => "JOINING",
            Reconciling => "RECONCILING",
            Acknowledging => "ACKNOWLEDGING",
            Stable => "STABLE",
            Fenced => "FENCED",
            PrepareLeaving => "PREPARE_LEAVING",
            Leaving => "LEAVING",
            Fatal => "FATAL",
        }
    }

    /// States from which a transition into `self` is allowed
    pub fn valid_previous_states(&self) -> &'static [MemberState] {
        match self {
            Unsubscribed => &[PrepareLeaving, Leaving, Fenced, Fatal],
            Joining => &[Unsubscribed, Fenced],
            Reconciling => &[Joining, Stable, Acknowledging, Reconciling],
            Acknowledging => &[Joining, Reconciling],
            Stable => &[Joining, Acknowledging, Reconciling],
            Fenced => &[
                Joining,
                Stable,
                Reconciling,
                Acknowledging,
                PrepareLeaving,
                Leaving,
            ],
            PrepareLeaving => &[Joining, Reconciling, Acknowledging, Stable],
            Leaving => &[PrepareLeaving],
            Fatal => &[
                Unsubscribed,
                Joining,
                Reconciling,
                Acknowledging,
                Stable,
                Fenced,
                PrepareLeaving,
                Leaving,
            ],
        }
    }

    pub fn can_transition_from(&self, previous: MemberState) -> bool {
        self.valid_previous_states().contains(&previous)
    }
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work in progress that waits on another thread or a request
#[derive(Debug)]
enum Stage {
    Idle,
    Committing {
        commit: CompletableFuture<()>,
        target: BTreeSet<TopicPartition>,
    },
    Revoking {
        callback: CompletableFuture<()>,
        target: BTreeSet<TopicPartition>,
    },
    Assigning {
        callback: CompletableFuture<()>,
        target: BTreeSet<TopicPartition>,
    },
    LeavingRevoke {
        callback: CompletableFuture<()>,
    },
    Lost {
        callback: CompletableFuture<()>,
    },
}

/// Membership of one consumer in one group
pub struct MembershipManager {
    group_id: String,
    member_id: String,
    member_epoch: i32,
    state: MemberState,
    current_assignment: BTreeSet<TopicPartition>,
    target_assignment: Option<BTreeSet<TopicPartition>>,
    stage: Stage,
    subscription_updated: bool,
    leave_future: Option<CompletableFuture<()>>,
    closing: bool,
    callback_timeout_ms: i64,
    background: BackgroundEventHandler,
    clock: Arc<dyn Clock>,
}

impl MembershipManager {
    pub fn new(
        group_id: impl Into<String>,
        background: BackgroundEventHandler,
        clock: Arc<dyn Clock>,
        callback_timeout_ms: i64,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            member_id: String::new(),
            member_epoch: JOIN_GROUP_MEMBER_EPOCH,
            state: Unsubscribed,
            current_assignment: BTreeSet::new(),
            target_assignment: None,
            stage: Stage::Idle,
            subscription_updated: false,
            leave_future: None,
            closing: false,
            callback_timeout_ms,
            background,
            clock,
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn member_id(&self) -> &str {
        &self.member_id
    }

    pub fn member_epoch(&self) -> i32 {
        self.member_epoch
    }

    pub fn state(&self) -> MemberState {
        self.state
    }

    pub fn current_assignment(&self) -> &BTreeSet<TopicPartition> {
        &self.current_assignment
    }

    pub fn target_assignment(&self) -> Option<&BTreeSet<TopicPartition>> {
        self.target_assignment.as_ref()
    }

    pub fn is_leaving_group(&self) -> bool {
        matches!(self.state, PrepareLeaving | Leaving)
    }

    /// State to carry in the next heartbeat
    pub fn snapshot(&self, subscriptions: &SubscriptionState) -> MemberSnapshot {
        MemberSnapshot {
            member_id: self.member_id.clone(),
            member_epoch: self.member_epoch,
            state: self.state,
            subscribed_topics: subscriptions.subscription().clone(),
            subscribed_pattern: subscriptions.pattern().map(|p| p.as_str().to_string()),
            owned_partitions: self.current_assignment.clone(),
        }
    }

    fn transition_to(&mut self, next: MemberState) -> Result<()> {
        if !next.can_transition_from(self.state) {
            return Err(ConsumerError::IllegalState(format!(
                "Invalid state transition from {} to {} for member {} of group {}",
                self.state, next, self.member_id, self.group_id
            )));
        }
        info!(
            "Member {} of group {} transitioned from {} to {}",
            self.member_id, self.group_id, self.state, next
        );
        self.state = next;
        Ok(())
    }

    fn transition_to_joining(&mut self) -> Result<()> {
        self.transition_to(Joining)?;
        self.member_epoch = JOIN_GROUP_MEMBER_EPOCH;
        self.target_assignment = None;
        self.stage = Stage::Idle;
        Ok(())
    }

    /// The subscription changed; the member joins on the next poll
    pub fn on_subscription_updated(&mut self) {
        self.subscription_updated = true;
    }

    /// The caller polled
    pub fn on_consumer_poll(&mut self) -> Result<()> {
        let updated = std::mem::take(&mut self.subscription_updated);
        if updated && self.state == Unsubscribed && !self.closing {
            self.transition_to_joining()?;
        }
        Ok(())
    }

    /// Apply the outcome of a heartbeat round trip
    pub fn on_heartbeat_outcome(
        &mut self,
        outcome: HeartbeatOutcome,
        subscriptions: &mut SubscriptionState,
    ) -> Result<()> {
        match outcome {
            HeartbeatOutcome::Success {
                member_id,
                member_epoch,
                assignment,
            } => self.on_heartbeat_success(member_id, member_epoch, assignment),
            HeartbeatOutcome::Fenced => self.transition_to_fenced(subscriptions),
            HeartbeatOutcome::Fatal(error) => self.transition_to_fatal(error, subscriptions),
            HeartbeatOutcome::RequestSent { member_epoch } => {
                self.on_heartbeat_request_sent(member_epoch, subscriptions)
            }
        }
    }

    fn on_heartbeat_success(
        &mut self,
        member_id: String,
        member_epoch: i32,
        assignment: Option<BTreeSet<TopicPartition>>,
    ) -> Result<()> {
        if matches!(
            self.state,
            Unsubscribed | PrepareLeaving | Leaving | Fenced | Fatal
        ) {
            debug!(
                "Ignoring heartbeat response for member {} in state {}",
                member_id, self.state
            );
            return Ok(());
        }

        if member_id != self.member_id || member_epoch != self.member_epoch {
            self.member_id = member_id;
            self.member_epoch = member_epoch;
            self.background.add(BackgroundEvent::GroupMetadataUpdate {
                member_id: self.member_id.clone(),
                member_epoch,
            });
        }

        let Some(target) = assignment else {
            return Ok(());
        };
        if self.state == Stable && target == self.current_assignment {
            return Ok(());
        }

        debug!(
            "Member {} received target assignment {:?}",
            self.member_id, target
        );
        self.target_assignment = Some(target);
        if self.state != Reconciling {
            self.transition_to(Reconciling)?;
        }
        Ok(())
    }

    fn on_heartbeat_request_sent(
        &mut self,
        member_epoch: i32,
        subscriptions: &mut SubscriptionState,
    ) -> Result<()> {
        match self.state {
            Acknowledging => self.transition_to(Stable),
            Leaving if member_epoch == LEAVE_GROUP_MEMBER_EPOCH => {
                self.finish_leaving(subscriptions)
            }
            _ => Ok(()),
        }
    }

    fn transition_to_fenced(&mut self, subscriptions: &mut SubscriptionState) -> Result<()> {
        match self.state {
            PrepareLeaving | Leaving => {
                info!(
                    "Member {} was fenced while leaving group {}, treating the leave as complete",
                    self.member_id, self.group_id
                );
                self.transition_to(Fenced)?;
                return self.finish_leaving(subscriptions);
            }
            Unsubscribed | Fenced | Fatal => {
                debug!("Ignoring fencing of member {} in state {}", self.member_id, self.state);
                return Ok(());
            }
            Joining | Reconciling | Acknowledging | Stable => {}
        }

        warn!(
            "Member {} was fenced at epoch {}, releasing its partitions and rejoining",
            self.member_id, self.member_epoch
        );
        self.transition_to(Fenced)?;
        self.member_epoch = JOIN_GROUP_MEMBER_EPOCH;
        self.target_assignment = None;
        self.stage = Stage::Idle;

        if self.current_assignment.is_empty() {
            return self.after_partitions_lost(subscriptions);
        }
        let owned = self.current_assignment.clone();
        let callback = self.request_callback(RebalanceCallbackMethod::OnPartitionsLost, owned);
        self.stage = Stage::Lost { callback };
        Ok(())
    }

    fn after_partitions_lost(&mut self, subscriptions: &mut SubscriptionState) -> Result<()> {
        self.release_assignment(subscriptions)?;
        if self.closing || !subscriptions.has_auto_subscription() {
            self.transition_to(Unsubscribed)
        } else {
            self.transition_to_joining()
        }
    }

    fn transition_to_fatal(
        &mut self,
        error: ConsumerError,
        subscriptions: &mut SubscriptionState,
    ) -> Result<()> {
        if self.state == Fatal {
            return Ok(());
        }
        warn!(
            "Member {} of group {} failed with a fatal error: {}",
            self.member_id, self.group_id, error
        );
        self.transition_to(Fatal)?;
        self.target_assignment = None;
        self.stage = Stage::Idle;
        self.release_assignment(subscriptions)?;
        if let Some(leave) = self.leave_future.take() {
            leave.complete(());
        }
        self.background.add(BackgroundEvent::Error(error));
        Ok(())
    }

    fn release_assignment(&mut self, subscriptions: &mut SubscriptionState) -> Result<()> {
        self.current_assignment.clear();
        if subscriptions.has_auto_subscription() {
            subscriptions.assign_from_subscribed(BTreeSet::new())?;
        }
        Ok(())
    }

    /// Leave the group, running the revocation callback first.
    ///
    /// The returned future completes once the leave heartbeat has been sent.
    /// A member that is not in the group completes immediately.
    pub fn leave_group(&mut self, subscriptions: &mut SubscriptionState) -> CompletableFuture<()> {
        match self.state {
            Unsubscribed | Fatal => {
                subscriptions.unsubscribe();
                self.current_assignment.clear();
                return CompletableFuture::completed(());
            }
            Fenced => {
                self.stage = Stage::Idle;
                subscriptions.unsubscribe();
                self.current_assignment.clear();
                return match self.transition_to(Unsubscribed) {
                    Ok(()) => CompletableFuture::completed(()),
                    Err(e) => CompletableFuture::failed(e),
                };
            }
            PrepareLeaving | Leaving => {
                if let Some(future) = &self.leave_future {
                    return future.clone();
                }
            }
            Joining | Reconciling | Acknowledging | Stable => {}
        }

        if let Err(e) = self.transition_to(PrepareLeaving) {
            return CompletableFuture::failed(e);
        }
        let future = CompletableFuture::new();
        self.leave_future = Some(future.clone());
        self.target_assignment = None;
        self.stage = Stage::Idle;

        if self.current_assignment.is_empty() {
            if let Err(e) = self.transition_to_leaving(subscriptions) {
                future.complete_exceptionally(e);
            }
        } else {
            let owned = self.current_assignment.clone();
            let callback = self.request_callback(RebalanceCallbackMethod::OnPartitionsRevoked, owned);
            self.stage = Stage::LeavingRevoke { callback };
        }
        future
    }

    /// Leave the group because the consumer is closing. The member will not
    /// rejoin afterwards.
    pub fn leave_group_on_close(
        &mut self,
        subscriptions: &mut SubscriptionState,
    ) -> CompletableFuture<()> {
        self.closing = true;
        self.leave_group(subscriptions)
    }

    fn transition_to_leaving(&mut self, subscriptions: &mut SubscriptionState) -> Result<()> {
        subscriptions.unsubscribe();
        self.current_assignment.clear();
        self.member_epoch = LEAVE_GROUP_MEMBER_EPOCH;
        self.transition_to(Leaving)
    }

    fn finish_leaving(&mut self, subscriptions: &mut SubscriptionState) -> Result<()> {
        subscriptions.unsubscribe();
        self.current_assignment.clear();
        self.member_epoch = JOIN_GROUP_MEMBER_EPOCH;
        self.stage = Stage::Idle;
        let result = self.transition_to(Unsubscribed);
        if let Some(leave) = self.leave_future.take() {
            match &result {
                Ok(()) => leave.complete(()),
                Err(e) => leave.complete_exceptionally(e.clone()),
            };
        }
        result
    }

    /// The caller finished a rebalance listener callback
    pub fn consumer_rebalance_listener_callback_completed(
        &mut self,
        completed: RebalanceCallbackCompleted,
    ) {
        match completed.error {
            Some(error) => {
                warn!(
                    "{} callback of member {} failed: {}",
                    completed.method.as_str(),
                    self.member_id,
                    error
                );
                completed.future.complete_exceptionally(error);
            }
            None => {
                debug!(
                    "{} callback of member {} completed",
                    completed.method.as_str(),
                    self.member_id
                );
                completed.future.complete(());
            }
        }
    }

    fn request_callback(
        &self,
        method: RebalanceCallbackMethod,
        partitions: BTreeSet<TopicPartition>,
    ) -> CompletableFuture<()> {
        let now = self.clock.now_ms();
        let handle: EventHandle<()> = EventHandle::new(
            BackgroundEventType::ConsumerRebalanceListenerCallbackNeeded.as_str(),
            now,
            calculate_deadline(now, self.callback_timeout_ms),
        );
        let future = handle.future().clone();
        debug!(
            "Requesting {} callback for {} partitions",
            method.as_str(),
            partitions.len()
        );
        self.background
            .add(BackgroundEvent::ConsumerRebalanceListenerCallbackNeeded(
                RebalanceCallbackNeeded {
                    handle,
                    method,
                    partitions,
                },
            ));
        future
    }

    /// Advance reconciliation, leaving or fencing as far as possible.
    ///
    /// `commits` is used for the auto-commit issued before partitions are
    /// revoked; without it revocation proceeds straight to the callback.
    pub fn maybe_reconcile(
        &mut self,
        subscriptions: &mut SubscriptionState,
        mut commits: Option<&mut (dyn CommitRequestManager + 'static)>,
        now_ms: i64,
    ) -> Result<()> {
        while self.advance(subscriptions, commits.as_deref_mut(), now_ms)? {}
        Ok(())
    }

    /// Take one step. Returns true if another step may be possible.
    fn advance(
        &mut self,
        subscriptions: &mut SubscriptionState,
        commits: Option<&mut (dyn CommitRequestManager + 'static)>,
        now_ms: i64,
    ) -> Result<bool> {
        match std::mem::replace(&mut self.stage, Stage::Idle) {
            Stage::Idle => self.start_reconciliation(subscriptions, commits, now_ms),
            Stage::Committing { commit, target } => {
                if !commit.is_done() {
                    self.stage = Stage::Committing { commit, target };
                    return Ok(false);
                }
                if let Some(Err(e)) = commit.try_get() {
                    warn!("Auto-commit before revocation failed: {}", e);
                }
                self.revoke_then_assign(target, subscriptions)?;
                Ok(true)
            }
            Stage::Revoking { callback, target } => {
                if !callback_finished(&callback, RebalanceCallbackMethod::OnPartitionsRevoked) {
                    self.stage = Stage::Revoking { callback, target };
                    return Ok(false);
                }
                self.apply_assignment(target, subscriptions)?;
                Ok(true)
            }
            Stage::Assigning { callback, target } => {
                if !callback_finished(&callback, RebalanceCallbackMethod::OnPartitionsAssigned) {
                    self.stage = Stage::Assigning { callback, target };
                    return Ok(false);
                }
                self.complete_reconciliation(target)?;
                Ok(true)
            }
            Stage::LeavingRevoke { callback } => {
                if !callback_finished(&callback, RebalanceCallbackMethod::OnPartitionsRevoked) {
                    self.stage = Stage::LeavingRevoke { callback };
                    return Ok(false);
                }
                if let Err(e) = self.transition_to_leaving(subscriptions) {
                    if let Some(leave) = self.leave_future.take() {
                        leave.complete_exceptionally(e.clone());
                    }
                    return Err(e);
                }
                Ok(false)
            }
            Stage::Lost { callback } => {
                if !callback_finished(&callback, RebalanceCallbackMethod::OnPartitionsLost) {
                    self.stage = Stage::Lost { callback };
                    return Ok(false);
                }
                self.after_partitions_lost(subscriptions)?;
                Ok(false)
            }
        }
    }

    fn start_reconciliation(
        &mut self,
        subscriptions: &mut SubscriptionState,
        commits: Option<&mut (dyn CommitRequestManager + 'static)>,
        now_ms: i64,
    ) -> Result<bool> {
        if self.state != Reconciling {
            return Ok(false);
        }
        let Some(target) = self.target_assignment.clone() else {
            return Ok(false);
        };

        let revoking = self.current_assignment.iter().any(|tp| !target.contains(tp));
        if revoking {
            if let Some(commits) = commits {
                let commit = commits.maybe_auto_commit_sync_before_revocation(
                    subscriptions.all_consumed(),
                    calculate_deadline(now_ms, self.callback_timeout_ms),
                );
                self.stage = Stage::Committing { commit, target };
                return Ok(true);
            }
        }

        self.revoke_then_assign(target, subscriptions)?;
        Ok(true)
    }

    fn revoke_then_assign(
        &mut self,
        target: BTreeSet<TopicPartition>,
        subscriptions: &mut SubscriptionState,
    ) -> Result<()> {
        let revoked: BTreeSet<TopicPartition> =
            self.current_assignment.difference(&target).cloned().collect();
        if revoked.is_empty() {
            return self.apply_assignment(target, subscriptions);
        }
        let callback = self.request_callback(RebalanceCallbackMethod::OnPartitionsRevoked, revoked);
        self.stage = Stage::Revoking { callback, target };
        Ok(())
    }

    fn apply_assignment(
        &mut self,
        target: BTreeSet<TopicPartition>,
        subscriptions: &mut SubscriptionState,
    ) -> Result<()> {
        let added: BTreeSet<TopicPartition> =
            target.difference(&self.current_assignment).cloned().collect();
        subscriptions.assign_from_subscribed(target.clone())?;
        self.current_assignment = target.clone();

        if added.is_empty() {
            return self.complete_reconciliation(target);
        }
        let callback = self.request_callback(RebalanceCallbackMethod::OnPartitionsAssigned, added);
        self.stage = Stage::Assigning { callback, target };
        Ok(())
    }

    fn complete_reconciliation(&mut self, target: BTreeSet<TopicPartition>) -> Result<()> {
        if self.state != Reconciling {
            return Ok(());
        }
        if self.target_assignment.as_ref() != Some(&target) {
            // A newer target arrived while this one was being applied
            return Ok(());
        }
        self.target_assignment = None;
        info!(
            "Member {} finished reconciling {} partitions",
            self.member_id,
            target.len()
        );
        self.transition_to(Acknowledging)
    }
}

fn callback_finished(callback: &CompletableFuture<()>, method: RebalanceCallbackMethod) -> bool {
    match callback.try_get() {
        None => false,
        Some(Ok(())) => true,
        Some(Err(e)) => {
            warn!("{} did not complete cleanly: {}", method.as_str(), e);
            true
        }
    }
}

impl fmt::Debug for MembershipManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MembershipManager")
            .field("group_id", &self.group_id)
            .field("member_id", &self.member_id)
            .field("member_epoch", &self.member_epoch)
            .field("state", &self.state)
            .field("current_assignment", &self.current_assignment)
            .field("stage", &self.stage)
            .finish()
    }
}
