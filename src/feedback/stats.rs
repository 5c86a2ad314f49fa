//! Aggregate statistics over visible feedback entries

use serde::{Deserialize, Serialize};

use super::types::{FeedbackEntry, Rating};

/// Count, mean and per-rating histogram of a feedback set.
///
/// Always derived from the visible entries currently held, never
/// maintained incrementally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStatistics {
    /// Number of visible entries
    #[serde(alias = "totalFeedbacks", alias = "total")]
    pub count: usize,
    /// Mean rating, `0.0` when there are no entries
    #[serde(alias = "averageRating", alias = "average")]
    pub mean: f64,
    /// `histogram[i]` is the number of entries rated `i + 1`
    #[serde(default)]
    pub histogram: [u32; 5],
}

impl AggregateStatistics {
    /// Computes statistics over the visible entries of `entries`.
    ///
    /// # Examples
    ///
    /// ```
    /// use reviewsync::feedback::{AggregateStatistics, FeedbackEntry};
    ///
    /// let stats = AggregateStatistics::from_entries(&Vec::<FeedbackEntry>::new());
    /// assert_eq!(stats.count, 0);
    /// assert_eq!(stats.mean, 0.0);
    /// assert_eq!(stats.most_popular_rating(), None);
    /// ```
    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = &'a FeedbackEntry>,
    {
        let mut histogram = [0u32; 5];
        let mut count = 0usize;
        let mut total = 0u64;

        for entry in entries.into_iter().filter(|e| e.visible) {
            let value = entry.rating.value();
            histogram[usize::from(value - Rating::MIN)] += 1;
            total += u64::from(value);
            count += 1;
        }

        let mean = if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        };

        Self {
            count,
            mean,
            histogram,
        }
    }

    /// Number of entries with the given rating.
    pub fn count_for(&self, rating: Rating) -> u32 {
        self.histogram[usize::from(rating.value() - Rating::MIN)]
    }

    /// The rating given most often. Ties resolve to the higher rating.
    pub fn most_popular_rating(&self) -> Option<Rating> {
        if self.count == 0 {
            return None;
        }
        // max_by_key returns the last maximum, i.e. the highest rating.
        let (index, _) = self
            .histogram
            .iter()
            .enumerate()
            .max_by_key(|(_, n)| **n)?;
        Rating::new(index as u8 + Rating::MIN).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::types::{Author, ContentRef};
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn entry(id: &str, rating: u8, visible: bool) -> FeedbackEntry {
        let now = Utc::now();
        FeedbackEntry {
            id: id.to_string(),
            author: Author {
                id: "u1".to_string(),
                name: "Ada".to_string(),
                avatar: None,
            },
            target: ContentRef::movie("m1"),
            body: "text".to_string(),
            rating: Rating::new(rating).unwrap(),
            visible,
            moderation: None,
            helpful_count: 0,
            helpful_voters: BTreeSet::new(),
            created_at: now,
            updated_at: now,
            client_mutation_id: None,
        }
    }

    #[test]
    fn test_empty_set_has_zero_mean() {
        let stats = AggregateStatistics::from_entries(&Vec::<FeedbackEntry>::new());
        assert_eq!(stats.count, 0);
        assert_eq!(stats.mean, 0.0);
        assert_eq!(stats.histogram, [0; 5]);
    }

    #[test]
    fn test_mean_and_histogram() {
        let entries = vec![entry("a", 5, true), entry("b", 3, true), entry("c", 4, true)];
        let stats = AggregateStatistics::from_entries(&entries);
        assert_eq!(stats.count, 3);
        assert!((stats.mean - 4.0).abs() < f64::EPSILON);
        assert_eq!(stats.histogram, [0, 0, 1, 1, 1]);
        assert_eq!(stats.count_for(Rating::new(5).unwrap()), 1);
    }

    #[test]
    fn test_hidden_entries_are_excluded() {
        let entries = vec![entry("a", 5, true), entry("b", 1, false)];
        let stats = AggregateStatistics::from_entries(&entries);
        assert_eq!(stats.count, 1);
        assert!((stats.mean - 5.0).abs() < f64::EPSILON);
        assert_eq!(stats.histogram[0], 0);
    }

    #[test]
    fn test_histogram_sums_to_count() {
        let entries: Vec<_> = (1..=5)
            .flat_map(|r| vec![entry("x", r, true); r as usize])
            .collect();
        let stats = AggregateStatistics::from_entries(&entries);
        assert_eq!(stats.histogram.iter().sum::<u32>() as usize, stats.count);
    }

    #[test]
    fn test_most_popular_prefers_higher_rating_on_tie() {
        let entries = vec![
            entry("a", 2, true),
            entry("b", 2, true),
            entry("c", 4, true),
            entry("d", 4, true),
            entry("e", 1, true),
        ];
        let stats = AggregateStatistics::from_entries(&entries);
        assert_eq!(stats.most_popular_rating(), Some(Rating::new(4).unwrap()));
    }

    #[test]
    fn test_most_popular_none_when_empty() {
        assert_eq!(AggregateStatistics::default().most_popular_rating(), None);
    }
}
