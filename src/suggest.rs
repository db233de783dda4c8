/// Edit distance between two words, computed over characters with a
/// single rolling row.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let target: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=target.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, &cb) in target.iter().enumerate() {
            let substituted = if ca == cb { diagonal } else { diagonal + 1 };
            diagonal = row[j + 1];
            row[j + 1] = substituted.min(row[j] + 1).min(row[j + 1] + 1);
        }
    }
    row[target.len()]
}

/// Hint for an unknown attribute or named parameter. A case-insensitive
/// exact match wins (the common mistake is wrong casing, e.g. `onerror`
/// for `onError`); otherwise the closest candidate within two edits.
pub fn did_you_mean(word: &str, candidates: &[&str]) -> Option<String> {
    for &candidate in candidates {
        if candidate.eq_ignore_ascii_case(word) && candidate != word {
            return Some(candidate.to_string());
        }
    }
    let lowered = word.to_lowercase();
    candidates
        .iter()
        .filter(|&&candidate| candidate != word)
        .map(|&candidate| (candidate, edit_distance(&lowered, &candidate.to_lowercase())))
        .filter(|&(_, distance)| distance <= 2)
        .min_by_key(|&(_, distance)| distance)
        .map(|(candidate, _)| candidate.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const INCLUDE_PARAMS: &[&str] = &[
        "src", "alt", "dca", "onError", "maxWait", "ttl", "noStore",
        "method", "entity", "appendHeader", "removeHeader", "setHeader",
    ];

    #[test]
    fn identical_words_have_zero_distance() {
        assert_eq!(edit_distance("maxWait", "maxWait"), 0);
    }

    #[test]
    fn single_substitution_costs_one() {
        assert_eq!(edit_distance("src", "srk"), 1);
    }

    #[test]
    fn insertions_and_deletions_cost_one_each() {
        assert_eq!(edit_distance("onError", "onErrors"), 1);
        assert_eq!(edit_distance("onErrors", "onError"), 1);
        assert_eq!(edit_distance("ttl", "tl"), 1);
    }

    #[test]
    fn empty_side_costs_the_full_length() {
        assert_eq!(edit_distance("", "alt"), 3);
        assert_eq!(edit_distance("alt", ""), 3);
    }

    #[test]
    fn transposition_counts_as_two_edits() {
        assert_eq!(edit_distance("cs", "sc"), 2);
    }

    #[test]
    fn case_mismatch_wins_over_edit_distance() {
        assert_eq!(did_you_mean("onerror", INCLUDE_PARAMS), Some("onError".to_string()));
        assert_eq!(did_you_mean("maxwait", INCLUDE_PARAMS), Some("maxWait".to_string()));
    }

    #[test]
    fn typo_falls_back_to_edit_distance() {
        assert_eq!(did_you_mean("sr", INCLUDE_PARAMS), Some("src".to_string()));
    }

    #[test]
    fn unrelated_word_has_no_hint() {
        assert_eq!(did_you_mean("collection", INCLUDE_PARAMS), None);
    }

    #[test]
    fn exact_word_is_not_its_own_hint() {
        assert_eq!(did_you_mean("src", INCLUDE_PARAMS), None);
    }
}
