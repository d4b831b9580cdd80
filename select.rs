use crate::models::{ClassificationCandidate, ClassificationResult};

// Earliest of tied maxima wins.
pub fn select_top(result: &ClassificationResult) -> Option<ClassificationCandidate> {
    let mut best: Option<&ClassificationCandidate> = None;
    for candidate in result.iter() {
        if !candidate.confidence.is_finite() {
            continue;
        }
        match best {
            Some(current) if candidate.confidence <= current.confidence => {}
            _ => best = Some(candidate),
        }
    }
    best.cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(pairs: &[(&str, f32)]) -> ClassificationResult {
        pairs
            .iter()
            .map(|(label, confidence)| ClassificationCandidate::new(*label, *confidence))
            .collect::<Vec<_>>()
            .into()
    }

    #[test]
    fn first_of_tied_maxima_wins() {
        let top = select_top(&result(&[("a", 0.9), ("b", 0.9), ("c", 0.5)])).unwrap();
        assert_eq!(top.label, "a");
    }

    #[test]
    fn picks_maximum_regardless_of_position() {
        let top = select_top(&result(&[("low", 0.1), ("mid", 0.4), ("high", 0.8)])).unwrap();
        assert_eq!(top, ClassificationCandidate::new("high", 0.8));
    }

    #[test]
    fn empty_result_selects_nothing() {
        assert_eq!(select_top(&ClassificationResult::default()), None);
    }

    #[test]
    fn nan_scores_are_ignored() {
        let top = select_top(&result(&[("nan", f32::NAN), ("ok", 0.2)])).unwrap();
        assert_eq!(top.label, "ok");
        assert_eq!(select_top(&result(&[("nan", f32::NAN)])), None);
    }
}
