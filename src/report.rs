//! Location reports returned for an accessory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One position observation of an accessory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationReport {
    pub latitude: f64,
    pub longitude: f64,
    pub horizontal_accuracy: f64,
    pub timestamp: DateTime<Utc>,
}

/// Pick the report with the newest timestamp.
///
/// On equal timestamps the report seen first wins, so the result only
/// depends on the order the remote returned them in.
pub fn latest_report<I>(reports: I) -> Option<LocationReport>
where
    I: IntoIterator<Item = LocationReport>,
{
    reports.into_iter().reduce(|latest, candidate| {
        if candidate.timestamp > latest.timestamp {
            candidate
        } else {
            latest
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn report(lat: f64, secs: i64) -> LocationReport {
        LocationReport {
            latitude: lat,
            longitude: -lat,
            horizontal_accuracy: 10.0,
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    #[test]
    fn empty_history_has_no_latest() {
        assert_eq!(latest_report(Vec::new()), None);
    }

    #[test]
    fn single_report_is_returned_unchanged() {
        let only = report(48.1, 0);
        assert_eq!(latest_report(vec![only.clone()]), Some(only));
    }

    #[test]
    fn newest_wins_regardless_of_position() {
        for newest_at in 0..4 {
            let reports: Vec<_> = (0..4)
                .map(|i| if i == newest_at { report(i as f64, 500) } else { report(i as f64, i) })
                .collect();

            let latest = latest_report(reports).unwrap();
            assert_eq!(latest.latitude, newest_at as f64);
        }
    }

    #[test]
    fn ties_keep_first_seen() {
        let reports = vec![report(1.0, 10), report(2.0, 30), report(3.0, 30), report(4.0, 5)];

        let latest = latest_report(reports).unwrap();

        assert_eq!(latest.latitude, 2.0);
    }
}
