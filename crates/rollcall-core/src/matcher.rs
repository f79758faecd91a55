//! Matching a live descriptor against the registered students.

use crate::types::{Descriptor, MatchResult, Student};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// Euclidean distance under which two descriptors are the same face.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Probability that [`DemoMatcher`] reports a match on a scan.
const DEMO_MATCH_PROBABILITY: f64 = 0.7;

/// Strategy for comparing a probe descriptor against registered students.
pub trait Matcher {
    fn compare(&self, probe: &Descriptor, gallery: &[Student], threshold: f32) -> MatchResult;
}

/// Nearest-descriptor matcher.
///
/// Scans every student and keeps the one with the smallest distance strictly
/// below `threshold`. Earlier gallery entries win ties.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Descriptor, gallery: &[Student], threshold: f32) -> MatchResult {
        let mut best_distance = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, student) in gallery.iter().enumerate() {
            let Some(descriptor) = student.descriptor.as_ref() else {
                continue;
            };
            if descriptor.len() != probe.len() {
                tracing::warn!(
                    student = %student.id,
                    stored = descriptor.len(),
                    probe = probe.len(),
                    "descriptor length mismatch; skipping student"
                );
                continue;
            }

            let distance = probe.euclidean_distance(descriptor);
            if distance < best_distance {
                best_distance = distance;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_distance < threshold => MatchResult {
                matched: true,
                distance: best_distance,
                student_id: Some(gallery[idx].id.clone()),
                student_name: Some(gallery[idx].name.clone()),
            },
            _ => MatchResult::no_match(best_distance),
        }
    }
}

/// Stand-in used when no descriptor model is available: picks a random
/// registered student and reports a match 70% of the time.
pub struct DemoMatcher {
    rng: Mutex<StdRng>,
}

impl DemoMatcher {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for DemoMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher for DemoMatcher {
    fn compare(&self, _probe: &Descriptor, gallery: &[Student], _threshold: f32) -> MatchResult {
        if gallery.is_empty() {
            return MatchResult::no_match(f32::INFINITY);
        }

        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let student = &gallery[rng.gen_range(0..gallery.len())];
        if rng.gen_bool(DEMO_MATCH_PROBABILITY) {
            MatchResult {
                matched: true,
                distance: 0.0,
                student_id: Some(student.id.clone()),
                student_name: Some(student.name.clone()),
            }
        } else {
            MatchResult::no_match(f32::INFINITY)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn student(id: &str, values: Option<Vec<f32>>) -> Student {
        Student {
            id: id.into(),
            name: format!("name-{id}"),
            course: "CS".into(),
            descriptor: values.map(Descriptor::new),
            photo: None,
            registered_at: Utc::now(),
        }
    }

    #[test]
    fn test_euclidean_picks_closest_under_threshold() {
        let probe = Descriptor::new(vec![0.0, 0.0]);
        let gallery = vec![
            student("far", Some(vec![1.0, 1.0])),
            student("near", Some(vec![0.1, 0.0])),
            student("closer", Some(vec![0.05, 0.0])),
        ];

        let result = EuclideanMatcher.compare(&probe, &gallery, DEFAULT_MATCH_THRESHOLD);
        assert!(result.matched);
        assert_eq!(result.student_id.as_deref(), Some("closer"));
        assert_eq!(result.student_name.as_deref(), Some("name-closer"));
        assert!((result.distance - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_threshold_is_strict() {
        let probe = Descriptor::new(vec![0.0, 0.0]);
        let gallery = vec![student("edge", Some(vec![0.6, 0.0]))];

        let result = EuclideanMatcher.compare(&probe, &gallery, 0.6);
        assert!(!result.matched);
        assert!(result.student_id.is_none());
        assert!((result.distance - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_first_student_wins_tie() {
        let probe = Descriptor::new(vec![0.0, 0.0]);
        let gallery = vec![
            student("first", Some(vec![0.2, 0.0])),
            student("second", Some(vec![0.0, 0.2])),
        ];

        let result = EuclideanMatcher.compare(&probe, &gallery, 0.6);
        assert_eq!(result.student_id.as_deref(), Some("first"));
    }

    #[test]
    fn test_euclidean_skips_missing_and_mismatched_descriptors() {
        let probe = Descriptor::new(vec![0.0, 0.0]);
        let gallery = vec![
            student("none", None),
            student("short", Some(vec![0.0])),
            student("ok", Some(vec![0.3, 0.0])),
        ];

        let result = EuclideanMatcher.compare(&probe, &gallery, 0.6);
        assert_eq!(result.student_id.as_deref(), Some("ok"));
    }

    #[test]
    fn test_euclidean_empty_gallery() {
        let probe = Descriptor::new(vec![0.0, 0.0]);
        let result = EuclideanMatcher.compare(&probe, &[], 0.6);
        assert!(!result.matched);
        assert!(result.distance.is_infinite());
    }

    #[test]
    fn test_demo_matcher_only_returns_gallery_members() {
        let matcher = DemoMatcher::with_seed(7);
        let probe = Descriptor::new(vec![0.0; 4]);
        let gallery = vec![student("a", None), student("b", None)];

        let mut matches = 0;
        for _ in 0..200 {
            let result = matcher.compare(&probe, &gallery, 0.6);
            if result.matched {
                matches += 1;
                let id = result.student_id.unwrap();
                assert!(id == "a" || id == "b");
            }
        }
        // 70% nominal; allow wide slack for a fixed seed.
        assert!(matches > 100 && matches < 190, "matches = {matches}");
    }

    #[test]
    fn test_demo_matcher_empty_gallery() {
        let matcher = DemoMatcher::with_seed(1);
        let result = matcher.compare(&Descriptor::new(vec![]), &[], 0.6);
        assert!(!result.matched);
    }
}
