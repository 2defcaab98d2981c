//! Plaintext statistics over analyzed cases.
//!
//! Only projections with `analyzed == true` are ever read. Every query is a pure scan: results
//! depend on the multiset of matching sentences, not on case order.

use crate::models::{ChargeStats, DecryptedProjection, JudgeDisparity};

pub struct QueryEngine<'a> {
    projections: &'a [DecryptedProjection],
}

impl<'a> QueryEngine<'a> {
    pub fn new(projections: &'a [DecryptedProjection]) -> Self {
        Self { projections }
    }

    fn analyzed(&self) -> impl Iterator<Item = &'a DecryptedProjection> + 'a {
        self.projections.iter().filter(|p| p.analyzed)
    }

    /// Average (floored), minimum and maximum sentence for `charge`. Exact, case-sensitive match.
    pub fn stats_by_charge(&self, charge: &str) -> ChargeStats {
        let mut sum = 0u64;
        let mut count = 0u64;
        let mut min: Option<u32> = None;
        let mut max: Option<u32> = None;

        for p in self.analyzed().filter(|p| p.charge == charge) {
            sum += u64::from(p.sentence_months);
            count += 1;
            min = Some(min.map_or(p.sentence_months, |m| m.min(p.sentence_months)));
            max = Some(max.map_or(p.sentence_months, |m| m.max(p.sentence_months)));
        }

        ChargeStats {
            charge: charge.to_string(),
            avg: if count == 0 { 0 } else { sum / count },
            min,
            max,
            count,
        }
    }

    /// Average sentence for `charge` per requested judge, in request order. Duplicates are
    /// answered independently; a judge with no matching case averages 0.
    pub fn disparities_by_judge(&self, charge: &str, judge_ids: &[String]) -> Vec<JudgeDisparity> {
        judge_ids
            .iter()
            .map(|judge_id| {
                let (sum, count) = self
                    .analyzed()
                    .filter(|p| p.charge == charge && &p.judge_id == judge_id)
                    .fold((0u64, 0u64), |(s, c), p| (s + u64::from(p.sentence_months), c + 1));
                JudgeDisparity {
                    judge_id: judge_id.clone(),
                    avg_sentence: if count == 0 { 0 } else { sum / count },
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn analyzed(charge: &str, months: u32, judge: &str) -> DecryptedProjection {
        DecryptedProjection {
            charge: charge.to_string(),
            sentence_months: months,
            judge_id: judge.to_string(),
            analyzed: true,
        }
    }

    fn theft_docket() -> Vec<DecryptedProjection> {
        vec![
            analyzed("Theft", 10, "A"),
            DecryptedProjection::default(),
            analyzed("Theft", 20, "A"),
            analyzed("Fraud", 48, "A"),
            analyzed("Theft", 30, "B"),
        ]
    }

    #[test]
    fn theft_scenario_statistics() {
        let docket = theft_docket();
        let engine = QueryEngine::new(&docket);

        let stats = engine.stats_by_charge("Theft");
        assert_eq!((stats.avg, stats.min, stats.max, stats.count), (20, Some(10), Some(30), 3));

        let disparities = engine.disparities_by_judge("Theft", &["A".to_string(), "B".to_string()]);
        assert_eq!(
            disparities,
            vec![
                JudgeDisparity { judge_id: "A".into(), avg_sentence: 15 },
                JudgeDisparity { judge_id: "B".into(), avg_sentence: 30 },
            ]
        );
    }

    #[test]
    fn empty_charge_reports_no_min_or_max() {
        let docket = theft_docket();
        let stats = QueryEngine::new(&docket).stats_by_charge("Arson");
        assert!(stats.is_empty());
        assert_eq!((stats.avg, stats.min, stats.max), (0, None, None));
    }

    #[test]
    fn charge_match_is_exact() {
        let docket = theft_docket();
        let engine = QueryEngine::new(&docket);
        assert_eq!(engine.stats_by_charge("theft").count, 0);
        assert_eq!(engine.stats_by_charge("Theft ").count, 0);
    }

    #[test]
    fn unanalyzed_projection_is_ignored_even_if_populated() {
        let mut stale = analyzed("Theft", 999, "A");
        stale.analyzed = false;
        let docket = vec![analyzed("Theft", 10, "A"), stale];

        let stats = QueryEngine::new(&docket).stats_by_charge("Theft");
        assert_eq!((stats.avg, stats.max, stats.count), (10, Some(10), 1));
    }

    #[test]
    fn disparities_keep_input_order_and_duplicates() {
        let docket = theft_docket();
        let judges: Vec<String> = ["B", "Z", "A", "B"].iter().map(|s| s.to_string()).collect();
        let out = QueryEngine::new(&docket).disparities_by_judge("Theft", &judges);

        let got: Vec<(&str, u64)> = out.iter().map(|d| (d.judge_id.as_str(), d.avg_sentence)).collect();
        assert_eq!(got, vec![("B", 30), ("Z", 0), ("A", 15), ("B", 30)]);
    }

    #[test]
    fn average_is_floored() {
        let docket = vec![analyzed("Theft", 10, "A"), analyzed("Theft", 11, "A")];
        assert_eq!(QueryEngine::new(&docket).stats_by_charge("Theft").avg, 10);
    }

    proptest! {
        #[test]
        fn charge_stats_ignore_case_order(
            sentences in prop::collection::vec((0u32..600, prop::bool::ANY), 0..40),
            rotate in 0usize..40,
        ) {
            let docket: Vec<DecryptedProjection> = sentences
                .iter()
                .map(|(m, theft)| analyzed(if *theft { "Theft" } else { "Fraud" }, *m, "A"))
                .collect();
            let mut shuffled = docket.clone();
            shuffled.reverse();
            if !shuffled.is_empty() {
                let k = rotate % shuffled.len();
                shuffled.rotate_left(k);
            }

            let a = QueryEngine::new(&docket).stats_by_charge("Theft");
            let b = QueryEngine::new(&shuffled).stats_by_charge("Theft");
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a.clone(), QueryEngine::new(&docket).stats_by_charge("Theft"));
            if let (Some(min), Some(max)) = (a.min, a.max) {
                prop_assert!(u64::from(min) <= a.avg && a.avg <= u64::from(max));
            } else {
                prop_assert_eq!(a.count, 0);
            }
        }
    }
}
