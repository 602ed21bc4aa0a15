use serde::Serialize;
use std::collections::HashMap;

/// A category score as stored. Ungraded and scored-zero are distinct states,
/// but both contribute 0 to the weighted final: an ungraded category counts
/// against the student until a mark is entered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreState {
    Ungraded,
    Scored(f64),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryWeight {
    pub category_id: String,
    pub name: String,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FinalGrade {
    pub percent: f64,
    pub letter: &'static str,
    pub weight_total: f64,
    pub weights_balanced: bool,
    pub graded_count: usize,
    pub ungraded_count: usize,
}

/// Inclusive letter bands. First matching band wins; bands cover 0..=100
/// with no overlap.
const LETTER_BANDS: &[(f64, f64, &str)] = &[
    (97.0, 100.0, "A+"),
    (93.0, 97.0, "A"),
    (90.0, 93.0, "A-"),
    (87.0, 90.0, "B+"),
    (83.0, 87.0, "B"),
    (80.0, 83.0, "B-"),
    (77.0, 80.0, "C+"),
    (73.0, 77.0, "C"),
    (70.0, 73.0, "C-"),
    (67.0, 70.0, "D+"),
    (63.0, 67.0, "D"),
    (60.0, 63.0, "D-"),
    (0.0, 60.0, "F"),
];

pub fn letter_for(percent: f64) -> &'static str {
    let p = percent.clamp(0.0, 100.0);
    for (lo, hi, letter) in LETTER_BANDS {
        // Half-open below the next band's floor, closed at 100.
        if p >= *lo && (p < *hi || (*hi == 100.0 && p <= 100.0)) {
            return letter;
        }
    }
    "F"
}

/// Computes `sum(score * weight / 100)` across a course's categories.
///
/// The result is deliberately NOT re-normalized when weights do not total
/// 100; `weights_balanced` reports the condition so callers can warn. A
/// missing score is treated as 0 in the sum but tracked in `ungraded_count`.
pub fn weighted_final(
    categories: &[CategoryWeight],
    scores: &HashMap<String, f64>,
) -> FinalGrade {
    let mut sum = 0.0_f64;
    let mut weight_total = 0.0_f64;
    let mut graded_count = 0_usize;
    let mut ungraded_count = 0_usize;

    for c in categories {
        weight_total += c.percentage;
        let state = scores
            .get(&c.category_id)
            .copied()
            .map(ScoreState::Scored)
            .unwrap_or(ScoreState::Ungraded);
        match state {
            ScoreState::Ungraded => {
                ungraded_count += 1;
            }
            ScoreState::Scored(v) => {
                graded_count += 1;
                sum += v * c.percentage / 100.0;
            }
        }
    }

    let percent = sum.clamp(0.0, 100.0);
    FinalGrade {
        percent,
        letter: letter_for(percent),
        weight_total,
        weights_balanced: (weight_total - 100.0).abs() < 1e-6,
        graded_count,
        ungraded_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(id: &str, name: &str, percentage: f64) -> CategoryWeight {
        CategoryWeight {
            category_id: id.to_string(),
            name: name.to_string(),
            percentage,
        }
    }

    #[test]
    fn worked_example_is_b_minus() {
        let cats = vec![
            category("hw", "Homework", 30.0),
            category("mid", "Midterm", 30.0),
            category("fin", "Final", 40.0),
        ];
        let scores: HashMap<String, f64> = [
            ("hw".to_string(), 80.0),
            ("mid".to_string(), 70.0),
            ("fin".to_string(), 90.0),
        ]
        .into_iter()
        .collect();
        let out = weighted_final(&cats, &scores);
        assert!((out.percent - 81.0).abs() < 1e-9);
        assert_eq!(out.letter, "B-");
        assert!(out.weights_balanced);
        assert_eq!(out.graded_count, 3);
        assert_eq!(out.ungraded_count, 0);
    }

    #[test]
    fn ungraded_category_counts_as_zero() {
        let cats = vec![category("hw", "Homework", 50.0), category("fin", "Final", 50.0)];
        let scores: HashMap<String, f64> = [("hw".to_string(), 100.0)].into_iter().collect();
        let out = weighted_final(&cats, &scores);
        assert!((out.percent - 50.0).abs() < 1e-9);
        assert_eq!(out.graded_count, 1);
        assert_eq!(out.ungraded_count, 1);
    }

    #[test]
    fn unbalanced_weights_are_reported_not_renormalized() {
        let cats = vec![category("hw", "Homework", 40.0), category("fin", "Final", 40.0)];
        let scores: HashMap<String, f64> = [
            ("hw".to_string(), 100.0),
            ("fin".to_string(), 100.0),
        ]
        .into_iter()
        .collect();
        let out = weighted_final(&cats, &scores);
        // 0.4*100 + 0.4*100: silently scaled, by stated policy.
        assert!((out.percent - 80.0).abs() < 1e-9);
        assert!(!out.weights_balanced);
        assert!((out.weight_total - 80.0).abs() < 1e-9);
    }

    #[test]
    fn letter_mapping_total_and_non_overlapping() {
        for p in 0..=100 {
            let letter = letter_for(p as f64);
            let hits = LETTER_BANDS
                .iter()
                .filter(|(lo, hi, _)| {
                    let p = p as f64;
                    p >= *lo && (p < *hi || (*hi == 100.0 && p <= 100.0))
                })
                .count();
            assert_eq!(hits, 1, "percent {} matched {} bands", p, hits);
            assert!(!letter.is_empty());
        }
        assert_eq!(letter_for(0.0), "F");
        assert_eq!(letter_for(59.9), "F");
        assert_eq!(letter_for(60.0), "D-");
        assert_eq!(letter_for(81.0), "B-");
        assert_eq!(letter_for(97.0), "A+");
        assert_eq!(letter_for(100.0), "A+");
    }

    #[test]
    fn raising_one_score_never_lowers_final() {
        let cats = vec![
            category("hw", "Homework", 30.0),
            category("mid", "Midterm", 30.0),
            category("fin", "Final", 40.0),
        ];
        let mut scores: HashMap<String, f64> = [
            ("hw".to_string(), 40.0),
            ("mid".to_string(), 55.0),
            ("fin".to_string(), 62.0),
        ]
        .into_iter()
        .collect();
        let mut prev = weighted_final(&cats, &scores).percent;
        for step in 1..=12 {
            scores.insert("mid".to_string(), 55.0 + (step as f64) * 3.0);
            let next = weighted_final(&cats, &scores).percent;
            assert!(next >= prev);
            prev = next;
        }
    }

    #[test]
    fn no_categories_is_zero_f() {
        let out = weighted_final(&[], &HashMap::new());
        assert_eq!(out.percent, 0.0);
        assert_eq!(out.letter, "F");
        assert_eq!(out.weight_total, 0.0);
    }
}
