// 10.0: network status from the last few height polls of the indexer and the validator.
// samples are newest first. the caller supplies `now` so the result is reproducible.

use crate::config::ApiStateParams;
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeightOutcome {
    Success { height: u64 },
    Error,
    /// Request still in flight.
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeightSample {
    pub request_time: Option<Timestamp>,
    pub outcome: HeightOutcome,
}

impl HeightSample {
    pub fn success(height: u64, request_time: Timestamp) -> Self {
        Self {
            request_time: Some(request_time),
            outcome: HeightOutcome::Success { height },
        }
    }

    pub fn error(request_time: Timestamp) -> Self {
        Self {
            request_time: Some(request_time),
            outcome: HeightOutcome::Error,
        }
    }

    fn height(&self) -> Option<u64> {
        match self.outcome {
            HeightOutcome::Success { height } => Some(height),
            HeightOutcome::Error | HeightOutcome::Pending => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkStatus {
    Unknown,
    Unreachable,
    Halted,
    Normal,
}

pub fn compute_network_status(samples: &[HeightSample], params: &ApiStateParams) -> NetworkStatus {
    if samples.is_empty() {
        return NetworkStatus::Unknown;
    }
    if samples
        .iter()
        .take(params.error_streak)
        .all(|s| s.outcome == HeightOutcome::Error)
    {
        return NetworkStatus::Unreachable;
    }

    let heights: Vec<u64> = samples.iter().filter_map(HeightSample::height).collect();
    if heights.len() >= params.halted_sample_size {
        let recent = &heights[..params.halted_sample_size];
        if recent.iter().all(|h| *h == recent[0]) {
            return NetworkStatus::Halted;
        }
    }
    NetworkStatus::Normal
}

pub fn latest_height(samples: &[HeightSample]) -> Option<u64> {
    samples.iter().find_map(HeightSample::height)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiStatus {
    Unknown,
    ValidatorDown,
    ValidatorHalted,
    IndexerDown,
    IndexerHalted,
    IndexerTrailing,
    Normal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiState {
    pub status: ApiStatus,
    pub halted_block: Option<u64>,
    pub trailing_blocks: Option<u64>,
    pub indexer_height: Option<u64>,
    pub validator_height: Option<u64>,
}

// (status, halted block, trailing blocks)
type StatusParts = (ApiStatus, Option<u64>, Option<u64>);

fn normal_or_trailing(indexer: Option<u64>, validator: Option<u64>, params: &ApiStateParams) -> StatusParts {
    if let (Some(indexer), Some(validator)) = (indexer, validator) {
        let behind = validator.saturating_sub(indexer);
        if behind > params.max_block_delay {
            return (ApiStatus::IndexerTrailing, None, Some(behind));
        }
    }
    (ApiStatus::Normal, None, None)
}

fn combine(
    validator_status: NetworkStatus,
    indexer_status: NetworkStatus,
    validator_height: Option<u64>,
    indexer_height: Option<u64>,
    params: &ApiStateParams,
) -> StatusParts {
    use NetworkStatus::*;
    match (validator_status, indexer_status) {
        (Normal, Normal | Unknown) | (Unknown, Normal) => normal_or_trailing(indexer_height, validator_height, params),
        (Unknown, Unknown) => (ApiStatus::Unknown, None, None),
        (Normal | Unknown, Unreachable) => (ApiStatus::IndexerDown, None, None),
        (Normal | Unknown, Halted) => (ApiStatus::IndexerHalted, indexer_height, None),
        (Unreachable, _) => (ApiStatus::ValidatorDown, None, None),
        (Halted, _) => (ApiStatus::ValidatorHalted, validator_height, None),
    }
}

// history unusable: empty, newest sample without a request time, or newest request too old
fn is_stale(samples: &[HeightSample], now: Timestamp, params: &ApiStateParams) -> bool {
    let Some(newest) = samples.first() else {
        return true;
    };
    let Some(request_time) = newest.request_time else {
        warn!("newest height sample has no request time");
        return true;
    };
    now.as_millis().saturating_sub(request_time.as_millis()) > params.staleness_ms
}

/// Last non-normal status that was logged. Cleared by a normal status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviousStatus(pub Option<ApiStatus>);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiStateUpdate {
    pub state: Option<ApiState>,
    pub previous: PreviousStatus,
}

pub fn compute_api_state(
    indexer: &[HeightSample],
    validator: &[HeightSample],
    now: Timestamp,
    params: &ApiStateParams,
    previous: PreviousStatus,
) -> ApiStateUpdate {
    if is_stale(indexer, now, params) || is_stale(validator, now, params) {
        return ApiStateUpdate { state: None, previous };
    }

    let indexer_height = latest_height(indexer);
    let validator_height = latest_height(validator);
    let (status, halted_block, trailing_blocks) = combine(
        compute_network_status(validator, params),
        compute_network_status(indexer, params),
        validator_height,
        indexer_height,
        params,
    );
    let state = ApiState {
        status,
        halted_block,
        trailing_blocks,
        indexer_height,
        validator_height,
    };

    let previous = if status == ApiStatus::Normal {
        PreviousStatus(None)
    } else {
        if previous.0 != Some(status) {
            info!(
                ?status,
                ?halted_block,
                ?trailing_blocks,
                ?indexer_height,
                ?validator_height,
                "computed non-normal api status"
            );
        }
        PreviousStatus(Some(status))
    };

    ApiStateUpdate {
        state: Some(state),
        previous,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: Timestamp = Timestamp(1_700_000_000_000);

    fn successes(heights: &[u64]) -> Vec<HeightSample> {
        heights.iter().map(|h| HeightSample::success(*h, NOW)).collect()
    }

    fn status(indexer: &[HeightSample], validator: &[HeightSample]) -> Option<ApiStatus> {
        compute_api_state(indexer, validator, NOW, &ApiStateParams::default(), PreviousStatus::default())
            .state
            .map(|s| s.status)
    }

    #[test]
    fn network_status_rules() {
        let params = ApiStateParams::default();
        assert_eq!(compute_network_status(&[], &params), NetworkStatus::Unknown);

        let errors = vec![HeightSample::error(NOW); 3];
        assert_eq!(compute_network_status(&errors, &params), NetworkStatus::Unreachable);

        let mut recovering = successes(&[10]);
        recovering.extend(errors);
        assert_eq!(compute_network_status(&recovering, &params), NetworkStatus::Normal);

        assert_eq!(compute_network_status(&successes(&[7; 6]), &params), NetworkStatus::Halted);
        assert_eq!(compute_network_status(&successes(&[7; 5]), &params), NetworkStatus::Normal);
        assert_eq!(compute_network_status(&successes(&[8, 7, 7, 7, 7, 7]), &params), NetworkStatus::Normal);
    }

    #[test]
    fn combined_status() {
        let ok = successes(&[100, 99]);
        assert_eq!(status(&ok, &ok), Some(ApiStatus::Normal));

        let trailing = successes(&[40, 39]);
        let update = compute_api_state(&trailing, &ok, NOW, &ApiStateParams::default(), PreviousStatus::default());
        let state = update.state.unwrap();
        assert_eq!(state.status, ApiStatus::IndexerTrailing);
        assert_eq!(state.trailing_blocks, Some(60));

        let down = vec![HeightSample::error(NOW); 3];
        assert_eq!(status(&down, &ok), Some(ApiStatus::IndexerDown));
        assert_eq!(status(&ok, &down), Some(ApiStatus::ValidatorDown));

        let halted = successes(&[5; 6]);
        let update = compute_api_state(&halted, &ok, NOW, &ApiStateParams::default(), PreviousStatus::default());
        assert_eq!(update.state.unwrap().halted_block, Some(5));
        assert_eq!(status(&ok, &halted), Some(ApiStatus::ValidatorHalted));
    }

    #[test]
    fn stale_or_empty_history_has_no_state() {
        let ok = successes(&[100]);
        assert_eq!(status(&[], &ok), None);

        let old = vec![HeightSample::success(100, Timestamp(NOW.0 - 45_001))];
        assert_eq!(status(&old, &ok), None);

        let untimed = vec![HeightSample {
            request_time: None,
            outcome: HeightOutcome::Pending,
        }];
        assert_eq!(status(&ok, &untimed), None);
    }

    #[test]
    fn previous_status_latches_until_normal() {
        let params = ApiStateParams::default();
        let ok = successes(&[100]);
        let down = vec![HeightSample::error(NOW); 3];

        let first = compute_api_state(&down, &ok, NOW, &params, PreviousStatus::default());
        assert_eq!(first.previous, PreviousStatus(Some(ApiStatus::IndexerDown)));

        let again = compute_api_state(&down, &ok, NOW, &params, first.previous);
        assert_eq!(again.previous, first.previous);

        let recovered = compute_api_state(&ok, &ok, NOW, &params, again.previous);
        assert_eq!(recovered.previous, PreviousStatus(None));
    }
}
