use std::{sync::Arc, time::Duration};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::{
    sync::{Notify, oneshot},
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};

use crate::{
    dto::{observer::ObserverEvent, sync::SyncEvent},
    services::sync_gateway::SyncGateway,
    state::{
        GameplayStore, ObserverHubs,
        leaderboard::{LeaderboardEntry, LeaderboardUpdate},
        room::{RoomId, RoundId},
        state_machine::RoomPhase,
    },
};

/// How a ticker should wind down.
#[derive(Debug, Clone, PartialEq)]
pub enum StopSignal {
    /// Push this terminal leaderboard, then exit.
    Final(LeaderboardUpdate),
    /// Exit without pushing anything.
    Cancel,
}

#[derive(Debug)]
struct PushedLeaderboard {
    round_id: RoundId,
    sequence: u64,
    entries: Vec<LeaderboardEntry>,
    is_final: bool,
}

/// Delivers leaderboards to observers and to the bus, keeping them monotonic per room.
pub struct LeaderboardPublisher {
    hubs: Arc<ObserverHubs>,
    gateway: Arc<SyncGateway>,
    only_on_change: bool,
    last: DashMap<RoomId, PushedLeaderboard>,
}

impl LeaderboardPublisher {
    /// Publisher delivering to `hubs` and `gateway`.
    pub fn new(hubs: Arc<ObserverHubs>, gateway: Arc<SyncGateway>, only_on_change: bool) -> Self {
        Self {
            hubs,
            gateway,
            only_on_change,
            last: DashMap::new(),
        }
    }

    /// Record `update` as pushed unless it would move the room backwards, repeat
    /// a final update, or (when configured) repeat an unchanged ranking.
    fn admit(&self, update: &LeaderboardUpdate) -> bool {
        let pushed = PushedLeaderboard {
            round_id: update.round_id,
            sequence: update.sequence,
            entries: update.entries.clone(),
            is_final: update.is_final,
        };
        match self.last.entry(update.room_id) {
            Entry::Vacant(slot) => {
                slot.insert(pushed);
                true
            }
            Entry::Occupied(mut slot) => {
                let previous = slot.get();
                if update.sequence < previous.sequence {
                    return false;
                }
                if previous.round_id == update.round_id {
                    if previous.is_final {
                        return false;
                    }
                    if !update.is_final
                        && self.only_on_change
                        && previous.entries == update.entries
                    {
                        return false;
                    }
                }
                slot.insert(pushed);
                true
            }
        }
    }

    /// Push to local observers and to the bus. Returns whether it was delivered.
    pub async fn push(&self, update: LeaderboardUpdate) -> bool {
        if !self.admit(&update) {
            return false;
        }
        debug!(
            room_id = update.room_id,
            sequence = update.sequence,
            is_final = update.is_final,
            "pushing leaderboard"
        );
        self.hubs
            .broadcast(update.room_id, ObserverEvent::Leaderboard(update.clone()));
        self.gateway
            .publish(SyncEvent::LeaderboardUpdated { update })
            .await;
        true
    }

    /// Push a leaderboard received from another process to local observers only.
    pub fn relay(&self, update: LeaderboardUpdate) -> bool {
        if !self.admit(&update) {
            return false;
        }
        self.hubs
            .broadcast(update.room_id, ObserverEvent::Leaderboard(update));
        true
    }

    /// Forget the room so a room reusing the id starts from scratch.
    pub fn forget(&self, room_id: RoomId) {
        self.last.remove(&room_id);
    }
}

struct Ticker {
    stop: oneshot::Sender<StopSignal>,
    nudge: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// One periodic leaderboard task per playing room.
pub struct BroadcastScheduler {
    store: Arc<GameplayStore>,
    publisher: Arc<LeaderboardPublisher>,
    period: Duration,
    tickers: DashMap<RoomId, Ticker>,
}

impl BroadcastScheduler {
    /// Scheduler pushing every `period`.
    pub fn new(
        store: Arc<GameplayStore>,
        publisher: Arc<LeaderboardPublisher>,
        period: Duration,
    ) -> Self {
        Self {
            store,
            publisher,
            period,
            tickers: DashMap::new(),
        }
    }

    /// Spawn the ticker of round `round_id` in `room_id`. Returns `false` when
    /// one is already running.
    pub fn start(&self, room_id: RoomId, round_id: RoundId) -> bool {
        if let Some(ticker) = self.tickers.get(&room_id)
            && !ticker.handle.is_finished()
        {
            return false;
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let nudge = Arc::new(Notify::new());
        let handle = tokio::spawn(run_ticker(
            self.store.clone(),
            self.publisher.clone(),
            room_id,
            round_id,
            self.period,
            stop_rx,
            nudge.clone(),
        ));
        self.tickers.insert(
            room_id,
            Ticker {
                stop: stop_tx,
                nudge,
                handle,
            },
        );
        info!(room_id, %round_id, period_ms = self.period.as_millis() as u64, "leaderboard ticker started");
        true
    }

    /// Request an immediate push from the running ticker.
    pub fn nudge(&self, room_id: RoomId) {
        if let Some(ticker) = self.tickers.get(&room_id) {
            ticker.nudge.notify_one();
        }
    }

    /// Stop the ticker and wait for it to exit.
    ///
    /// A final update is still pushed when no ticker is running.
    pub async fn stop(&self, room_id: RoomId, signal: StopSignal) {
        let Some((_, ticker)) = self.tickers.remove(&room_id) else {
            if let StopSignal::Final(update) = signal {
                self.publisher.push(update).await;
            }
            return;
        };

        if let Err(StopSignal::Final(update)) = ticker.stop.send(signal) {
            self.publisher.push(update).await;
        }
        if let Err(err) = ticker.handle.await {
            warn!(room_id, error = %err, "leaderboard ticker ended abnormally");
        }
        info!(room_id, "leaderboard ticker stopped");
    }

    /// Whether a ticker is alive for `room_id`.
    pub fn is_running(&self, room_id: RoomId) -> bool {
        self.tickers
            .get(&room_id)
            .is_some_and(|ticker| !ticker.handle.is_finished())
    }

    /// Number of live tickers.
    pub fn active_count(&self) -> usize {
        self.tickers
            .iter()
            .filter(|ticker| !ticker.handle.is_finished())
            .count()
    }
}

async fn run_ticker(
    store: Arc<GameplayStore>,
    publisher: Arc<LeaderboardPublisher>,
    room_id: RoomId,
    round_id: RoundId,
    period: Duration,
    mut stop: oneshot::Receiver<StopSignal>,
    nudge: Arc<Notify>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            signal = &mut stop => {
                if let Ok(StopSignal::Final(update)) = signal {
                    publisher.push(update).await;
                }
                break;
            }
            _ = ticker.tick() => {}
            _ = nudge.notified() => {}
        }

        let update = store
            .read_room(room_id, |room| {
                if room.phase() == RoomPhase::Playing && room.round_id() == Some(round_id) {
                    room.leaderboard_update()
                } else {
                    None
                }
            })
            .await
            .flatten();
        let Some(update) = update else {
            debug!(room_id, %round_id, "round no longer playing; leaderboard ticker exiting");
            break;
        };
        publisher.push(update).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::broadcast::Receiver;
    use tokio::time::{sleep, timeout};
    use uuid::Uuid;

    use super::*;
    use crate::{
        dao::local_bus::LocalBus,
        state::{SessionMetrics, buffer::frame, room::UserGameState},
    };

    const PERIOD: Duration = Duration::from_millis(100);

    fn fixture(only_on_change: bool) -> (Arc<GameplayStore>, Arc<ObserverHubs>, BroadcastScheduler) {
        let store = Arc::new(GameplayStore::new(8));
        let hubs = Arc::new(ObserverHubs::new(16));
        let gateway = Arc::new(SyncGateway::new(
            Arc::new(LocalBus::default()),
            Uuid::new_v4(),
            Arc::new(SessionMetrics::new()),
        ));
        let publisher = Arc::new(LeaderboardPublisher::new(
            hubs.clone(),
            gateway,
            only_on_change,
        ));
        let scheduler = BroadcastScheduler::new(store.clone(), publisher, PERIOD);
        (store, hubs, scheduler)
    }

    async fn playing_room(store: &GameplayStore) -> RoundId {
        store.create_room(1, 10).unwrap();
        let round_id = Uuid::new_v4();
        store
            .with_room(1, |room| {
                room.set_user_state(10, UserGameState::Ready).unwrap();
                room.start_round(round_id).unwrap();
                room.append_frame(10, round_id, frame(1, 100)).unwrap();
            })
            .await
            .unwrap();
        round_id
    }

    async fn next_leaderboard(receiver: &mut Receiver<ObserverEvent>) -> LeaderboardUpdate {
        match timeout(Duration::from_secs(5), receiver.recv()).await {
            Ok(Ok(ObserverEvent::Leaderboard(update))) => update,
            other => panic!("expected a leaderboard, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_leaderboards_are_pushed_once() {
        let (store, hubs, scheduler) = fixture(true);
        let round_id = playing_room(&store).await;
        let mut receiver = hubs.subscribe(1);

        assert!(scheduler.start(1, round_id));
        assert!(!scheduler.start(1, round_id));

        let update = next_leaderboard(&mut receiver).await;
        assert_eq!(update.round_id, round_id);
        assert_eq!(update.entries[0].total_score, 100);

        sleep(PERIOD * 5).await;
        assert!(receiver.try_recv().is_err());

        store
            .with_room(1, |room| room.append_frame(10, round_id, frame(2, 250)))
            .await
            .unwrap()
            .unwrap();
        let update = next_leaderboard(&mut receiver).await;
        assert_eq!(update.entries[0].total_score, 250);

        scheduler.stop(1, StopSignal::Cancel).await;
        assert!(!scheduler.is_running(1));
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_with_a_final_update_pushes_it_last() {
        let (store, hubs, scheduler) = fixture(true);
        let round_id = playing_room(&store).await;
        let mut receiver = hubs.subscribe(1);
        scheduler.start(1, round_id);
        let first = next_leaderboard(&mut receiver).await;

        let end = store
            .with_room(1, |room| {
                room.set_user_state(10, UserGameState::FinishedPlaying)
                    .unwrap();
                room.end_round(crate::state::state_machine::RoundOutcome::Completed)
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(end.round_id, round_id);

        scheduler.stop(1, StopSignal::Final(end.final_update.clone())).await;

        let last = next_leaderboard(&mut receiver).await;
        assert!(last.is_final);
        assert!(last.sequence > first.sequence);
        assert_eq!(scheduler.active_count(), 0);

        sleep(PERIOD * 3).await;
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn nudges_push_without_waiting_for_the_tick() {
        let (store, hubs, scheduler) = fixture(true);
        let round_id = playing_room(&store).await;
        let mut receiver = hubs.subscribe(1);
        scheduler.start(1, round_id);
        tokio::task::yield_now().await;

        scheduler.nudge(1);
        let update = timeout(PERIOD / 2, receiver.recv()).await;
        assert!(matches!(update, Ok(Ok(ObserverEvent::Leaderboard(_)))));

        scheduler.stop(1, StopSignal::Cancel).await;
    }

    #[tokio::test(start_paused = true)]
    async fn tickers_exit_once_their_round_is_over() {
        let (store, hubs, scheduler) = fixture(true);
        let round_id = playing_room(&store).await;
        store
            .with_room(1, |room| {
                room.set_user_state(10, UserGameState::FinishedPlaying)
                    .unwrap();
                room.end_round(crate::state::state_machine::RoundOutcome::Completed)
            })
            .await
            .unwrap()
            .unwrap();
        let mut receiver = hubs.subscribe(1);

        assert!(scheduler.start(1, round_id));
        sleep(PERIOD * 3).await;
        assert!(!scheduler.is_running(1));
        assert_eq!(scheduler.active_count(), 0);
        assert!(receiver.try_recv().is_err());

        assert!(scheduler.start(1, Uuid::new_v4()));
        sleep(PERIOD * 3).await;
        assert!(!scheduler.is_running(1), "a ticker for another round never pushes");
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn publisher_never_moves_backwards() {
        let (_, hubs, scheduler) = fixture(false);
        let publisher = scheduler.publisher.clone();
        let mut receiver = hubs.subscribe(3);
        let round_id = Uuid::new_v4();
        let update = |sequence, is_final| LeaderboardUpdate {
            room_id: 3,
            round_id,
            sequence,
            entries: Vec::new(),
            is_final,
            aborted: false,
        };

        assert!(publisher.push(update(5, false)).await);
        assert!(!publisher.push(update(4, false)).await);
        assert!(publisher.push(update(5, false)).await, "unconditional mode repeats");
        assert!(publisher.push(update(6, true)).await);
        assert!(!publisher.push(update(6, true)).await);
        assert!(!publisher.relay(update(7, false)));

        for expected in [5, 5, 6] {
            assert_eq!(next_leaderboard(&mut receiver).await.sequence, expected);
        }
    }
}
