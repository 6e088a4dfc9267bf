//! Channel search: which channel to try next, when to re-home the hub, when to give up.
//! Host-driven like the rest of the crate: the host asks for the next [`Step`], performs
//! it against the link, and reports the result back.
//!
//! Order: the fixed channel alone (if the link is pinned), otherwise the active channel
//! first, then every legal channel from [`FIRST_CHANNEL`] to [`LAST_CHANNEL`].

use crate::config::{FIRST_CHANNEL, LAST_CHANNEL};

/// Discovery targets the broadcast address; unicast targets a known hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Discovery,
    Unicast,
}

/// Next thing the host must do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Switch the link to `channel`. Report with [`ChannelSearch::channel_set`].
    SetChannel(u8),
    /// Move the target peer to `channel`. Report with [`ChannelSearch::rehomed`].
    Rehome(u8),
    /// Arm the ack waiter, send, wait. Report with [`ChannelSearch::attempted`].
    /// `attempt` counts from 1 on each channel.
    Attempt { channel: u8, attempt: u8 },
    /// Sleep the retry delay before the next attempt on the same channel.
    Backoff,
    Finished(SearchOutcome),
}

/// Terminal state of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    Delivered { channel: u8 },
    /// Pinned channel exhausted; scanning was not allowed.
    NoAckOnKnownChannel,
    AllChannelsExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Fixed,
    Current,
    Sweep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Tune,
    Rehome,
    Deliver,
}

/// One search session.
#[derive(Debug, Clone)]
pub struct ChannelSearch {
    mode: SearchMode,
    phase: Phase,
    stage: Stage,
    channel: u8,
    max_retries: u8,
    attempts: u8,
    backoff_due: bool,
    outcome: Option<SearchOutcome>,
}

impl ChannelSearch {
    /// The link's channel is pinned by another connection: try `channel` only.
    pub fn fixed(mode: SearchMode, channel: u8, max_retries: u8) -> Self {
        Self::start(mode, Phase::Fixed, channel, max_retries)
    }

    /// Try `current` first, then sweep all channels.
    pub fn roaming(mode: SearchMode, current: u8, max_retries: u8) -> Self {
        Self::start(mode, Phase::Current, current, max_retries)
    }

    fn start(mode: SearchMode, phase: Phase, channel: u8, max_retries: u8) -> Self {
        Self {
            mode,
            phase,
            stage: Stage::Deliver,
            channel,
            max_retries: max_retries.max(1),
            attempts: 0,
            backoff_due: false,
            outcome: None,
        }
    }

    pub fn mode(&self) -> SearchMode {
        self.mode
    }

    /// Channel currently being tried.
    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn is_sweeping(&self) -> bool {
        self.phase == Phase::Sweep
    }

    pub fn outcome(&self) -> Option<SearchOutcome> {
        self.outcome
    }

    pub fn next_step(&mut self) -> Step {
        if let Some(outcome) = self.outcome {
            return Step::Finished(outcome);
        }
        match self.stage {
            Stage::Tune => return Step::SetChannel(self.channel),
            Stage::Rehome => return Step::Rehome(self.channel),
            Stage::Deliver => {}
        }
        if self.backoff_due {
            self.backoff_due = false;
            return Step::Backoff;
        }
        Step::Attempt {
            channel: self.channel,
            attempt: self.attempts + 1,
        }
    }

    /// Result of [`Step::SetChannel`]. Failure skips the channel.
    pub fn channel_set(&mut self, ok: bool) {
        if self.stage != Stage::Tune {
            return;
        }
        if !ok {
            self.next_channel();
            return;
        }
        self.stage = match self.mode {
            SearchMode::Unicast => Stage::Rehome,
            SearchMode::Discovery => Stage::Deliver,
        };
    }

    /// Result of [`Step::Rehome`]. Failure skips the channel.
    pub fn rehomed(&mut self, ok: bool) {
        if self.stage != Stage::Rehome {
            return;
        }
        if ok {
            self.stage = Stage::Deliver;
        } else {
            self.next_channel();
        }
    }

    /// Result of [`Step::Attempt`]: whether the ack arrived in time.
    pub fn attempted(&mut self, acked: bool) {
        if self.outcome.is_some() || self.stage != Stage::Deliver {
            return;
        }
        self.attempts += 1;
        if acked {
            self.outcome = Some(SearchOutcome::Delivered {
                channel: self.channel,
            });
            return;
        }
        if self.attempts < self.max_retries {
            self.backoff_due = true;
            return;
        }
        match self.phase {
            Phase::Fixed => self.outcome = Some(SearchOutcome::NoAckOnKnownChannel),
            Phase::Current => {
                self.phase = Phase::Sweep;
                self.enter_channel(FIRST_CHANNEL);
            }
            Phase::Sweep => self.next_channel(),
        }
    }

    fn next_channel(&mut self) {
        if self.channel >= LAST_CHANNEL {
            self.outcome = Some(SearchOutcome::AllChannelsExhausted);
        } else {
            self.enter_channel(self.channel + 1);
        }
    }

    fn enter_channel(&mut self, channel: u8) {
        self.channel = channel;
        self.stage = Stage::Tune;
        self.attempts = 0;
        self.backoff_due = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run a search to completion. `acks(channel)` decides each attempt; `tune_ok` and
    /// `rehome_ok` decide the preparation steps. Returns the steps taken and the outcome.
    fn drive(
        mut search: ChannelSearch,
        mut acks: impl FnMut(u8) -> bool,
        tune_ok: impl Fn(u8) -> bool,
        rehome_ok: impl Fn(u8) -> bool,
    ) -> (Vec<Step>, SearchOutcome) {
        let mut steps = Vec::new();
        loop {
            let step = search.next_step();
            match step {
                Step::Finished(outcome) => return (steps, outcome),
                Step::SetChannel(ch) => search.channel_set(tune_ok(ch)),
                Step::Rehome(ch) => search.rehomed(rehome_ok(ch)),
                Step::Attempt { channel, .. } => search.attempted(acks(channel)),
                Step::Backoff => {}
            }
            steps.push(step);
            assert!(steps.len() < 1000, "search did not terminate");
        }
    }

    fn attempted_channels(steps: &[Step]) -> Vec<u8> {
        steps
            .iter()
            .filter_map(|s| match s {
                Step::Attempt { channel, .. } => Some(*channel),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn current_channel_success_needs_no_tuning() {
        let search = ChannelSearch::roaming(SearchMode::Unicast, 6, 3);
        let (steps, outcome) = drive(search, |ch| ch == 6, |_| true, |_| true);
        assert_eq!(outcome, SearchOutcome::Delivered { channel: 6 });
        assert_eq!(steps, vec![Step::Attempt { channel: 6, attempt: 1 }]);
    }

    #[test]
    fn retries_are_separated_by_backoff() {
        let search = ChannelSearch::fixed(SearchMode::Unicast, 4, 3);
        let (steps, outcome) = drive(search, |_| false, |_| true, |_| true);
        assert_eq!(outcome, SearchOutcome::NoAckOnKnownChannel);
        assert_eq!(
            steps,
            vec![
                Step::Attempt { channel: 4, attempt: 1 },
                Step::Backoff,
                Step::Attempt { channel: 4, attempt: 2 },
                Step::Backoff,
                Step::Attempt { channel: 4, attempt: 3 },
            ]
        );
    }

    #[test]
    fn sweep_stops_at_first_acking_channel() {
        let search = ChannelSearch::roaming(SearchMode::Discovery, 11, 2);
        let (steps, outcome) = drive(search, |ch| ch == 7, |_| true, |_| true);
        assert_eq!(outcome, SearchOutcome::Delivered { channel: 7 });
        let mut expected = vec![11, 11];
        for ch in 1..7 {
            expected.extend([ch, ch]);
        }
        expected.push(7);
        assert_eq!(attempted_channels(&steps), expected);
        assert!(!steps.iter().any(|s| matches!(s, Step::Rehome(_))));
    }

    #[test]
    fn unicast_sweep_rehomes_before_each_channel() {
        let search = ChannelSearch::roaming(SearchMode::Unicast, 1, 1);
        let (steps, _) = drive(search, |ch| ch == 3, |_| true, |_| true);
        assert_eq!(
            steps,
            vec![
                Step::Attempt { channel: 1, attempt: 1 },
                Step::SetChannel(1),
                Step::Rehome(1),
                Step::Attempt { channel: 1, attempt: 1 },
                Step::SetChannel(2),
                Step::Rehome(2),
                Step::Attempt { channel: 2, attempt: 1 },
                Step::SetChannel(3),
                Step::Rehome(3),
                Step::Attempt { channel: 3, attempt: 1 },
            ]
        );
    }

    #[test]
    fn exhaustion_after_full_sweep() {
        let search = ChannelSearch::roaming(SearchMode::Unicast, 5, 3);
        let (steps, outcome) = drive(search, |_| false, |_| true, |_| true);
        assert_eq!(outcome, SearchOutcome::AllChannelsExhausted);
        assert_eq!(attempted_channels(&steps).len(), 3 + 13 * 3);
    }

    #[test]
    fn failed_rehome_skips_channel() {
        let search = ChannelSearch::roaming(SearchMode::Unicast, 2, 1);
        // The hub answers everywhere except on the first attempt, which forces the sweep.
        let mut first = true;
        let (steps, outcome) = drive(
            search,
            move |_| !std::mem::replace(&mut first, false),
            |_| true,
            |ch| ch != 1,
        );
        assert_eq!(outcome, SearchOutcome::Delivered { channel: 2 });
        assert_eq!(attempted_channels(&steps), vec![2, 2]);
        assert!(steps.contains(&Step::Rehome(1)));
        assert!(!steps.contains(&Step::Attempt { channel: 1, attempt: 1 }));
    }

    #[test]
    fn failed_tune_skips_channel() {
        let search = ChannelSearch::roaming(SearchMode::Discovery, 9, 1);
        let (steps, outcome) = drive(search, |ch| ch == 2, |ch| ch != 1, |_| true);
        assert_eq!(outcome, SearchOutcome::Delivered { channel: 2 });
        assert_eq!(attempted_channels(&steps), vec![9, 2]);
    }

    #[test]
    fn finished_is_sticky() {
        let mut search = ChannelSearch::fixed(SearchMode::Discovery, 1, 1);
        assert_eq!(search.next_step(), Step::Attempt { channel: 1, attempt: 1 });
        search.attempted(true);
        search.attempted(false);
        let done = Step::Finished(SearchOutcome::Delivered { channel: 1 });
        assert_eq!(search.next_step(), done);
        assert_eq!(search.next_step(), done);
    }
}
