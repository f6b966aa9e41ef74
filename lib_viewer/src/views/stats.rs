use std::collections::BTreeMap;

use serde::Serialize;

use crate::connections::Record;

/// How many call signs the statistics tab lists.
pub const DEFAULT_TOP_N: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSignCount {
    pub call_sign: String,
    pub count: usize,
}

/// Summary shown on the statistics tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total: usize,
    /// Distinct non-null call signs.
    pub unique_call_signs: usize,
    /// Most frequent call signs, highest count first, ties by name.
    pub top_call_signs: Vec<CallSignCount>,
}

pub fn statistics(records: &[Record], top_n: usize) -> Statistics {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for call_sign in records.iter().filter_map(|r| r.call_sign.as_deref()) {
        *counts.entry(call_sign).or_insert(0) += 1;
    }

    let unique_call_signs = counts.len();
    let mut ranked: Vec<CallSignCount> = counts
        .into_iter()
        .map(|(call_sign, count)| CallSignCount {
            call_sign: call_sign.to_string(),
            count,
        })
        .collect();
    // Stable sort keeps the BTreeMap's name order for equal counts.
    ranked.sort_by(|a, b| b.count.cmp(&a.count));
    ranked.truncate(top_n);

    Statistics {
        total: records.len(),
        unique_call_signs,
        top_call_signs: ranked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_ranks_call_signs() {
        let data = vec![
            Record::new("1", Some("A"), Some("Kilo")),
            Record::new("2", Some("B"), Some("Alpha")),
            Record::new("3", Some("C"), Some("Kilo")),
            Record::new("4", Some("D"), None),
            Record::new("5", Some("E"), Some("Bravo")),
        ];

        let stats = statistics(&data, DEFAULT_TOP_N);

        assert_eq!(stats.total, 5);
        assert_eq!(stats.unique_call_signs, 3);
        let order: Vec<(&str, usize)> = stats
            .top_call_signs
            .iter()
            .map(|c| (c.call_sign.as_str(), c.count))
            .collect();
        assert_eq!(order, vec![("Kilo", 2), ("Alpha", 1), ("Bravo", 1)]);
    }

    #[test]
    fn top_n_truncates() {
        let data: Vec<Record> = (0..15)
            .map(|i| Record::new(i.to_string(), None, Some(format!("CS{:02}", i).as_str())))
            .collect();
        let stats = statistics(&data, DEFAULT_TOP_N);
        assert_eq!(stats.unique_call_signs, 15);
        assert_eq!(stats.top_call_signs.len(), 10);
        assert_eq!(stats.top_call_signs[0].call_sign, "CS00");
    }

    #[test]
    fn empty_input() {
        let stats = statistics(&[], DEFAULT_TOP_N);
        assert_eq!(stats.total, 0);
        assert!(stats.top_call_signs.is_empty());
    }
}
