use crate::models::PollRecord;

// Vote count for one option, as shown to users
#[derive(Debug, Clone, PartialEq)]
pub struct OptionTally {
    pub option: String,
    pub votes: u64,
    pub percentage: f64,
}

// Per-option tallies in the poll's own option order. Result keys that aren't
// (yet) among the options are listed after them
pub fn tally(record: &PollRecord) -> Vec<OptionTally> {
    let total = record.total_votes();

    let mut names: Vec<&str> = record.options.iter().map(String::as_str).collect();
    for key in record.results.keys() {
        if !record.options.contains(key) {
            names.push(key);
        }
    }

    names
        .into_iter()
        .map(|name| {
            let votes = record.results.get(name).copied().unwrap_or(0);
            let percentage = if total > 0 {
                votes as f64 * 100.0 / total as f64
            } else {
                0.0
            };
            OptionTally {
                option: name.to_string(),
                votes,
                percentage,
            }
        })
        .collect()
}

pub fn results_summary(record: &PollRecord) -> String {
    let mut summary = String::new();

    summary.push_str(&format!("Poll Question: {}\n", record.question));
    summary.push_str(&format!("Message ID: {}\n", record.id));
    if record.selectable_count == 0 {
        summary.push_str("Allows Multiple Answers: Yes (Any number)\n");
    } else {
        summary.push_str(&format!(
            "Allows Multiple Answers: No (selectable: {})\n",
            record.selectable_count
        ));
    }
    summary.push_str("Results:\n");

    let tallies = tally(record);
    if tallies.is_empty() {
        summary.push_str("  (no options known yet)\n");
    }
    for entry in &tallies {
        summary.push_str(&format!(
            "  - \"{}\": {} votes ({:.1}%)\n",
            entry.option, entry.votes, entry.percentage
        ));
    }

    summary.push_str(&format!("{} voters participated.", record.voters.len()));
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PollPayload;
    use serde_json::json;

    fn record(value: serde_json::Value) -> PollRecord {
        PollRecord::from_payload("3EB0AA", PollPayload::from_value(value).unwrap(), 0)
    }

    #[test]
    fn tally_follows_option_order() {
        let poll = record(json!({
            "question": "Q?",
            "options": ["Yes", "No"],
            "results": { "No": 1, "Yes": 3 }
        }));

        let tallies = tally(&poll);
        assert_eq!(tallies[0].option, "Yes");
        assert_eq!(tallies[0].percentage, 75.0);
        assert_eq!(tallies[1].option, "No");
        assert_eq!(tallies[1].votes, 1);
    }

    #[test]
    fn results_without_options_still_show() {
        let poll = record(json!({ "results": { "Yes": 0, "No": 0 } }));

        let tallies = tally(&poll);
        assert_eq!(tallies.len(), 2);
        assert!(tallies.iter().all(|t| t.percentage == 0.0));
    }

    #[test]
    fn summary_text() {
        let poll = record(json!({
            "question": "Lunch?",
            "options": ["Pizza", "Salad"],
            "results": { "Pizza": 1, "Salad": 1 },
            "voters": { "a": ["h1"], "b": ["h2"] },
            "selectableCount": 0
        }));

        let text = results_summary(&poll);
        assert!(text.contains("Allows Multiple Answers: Yes (Any number)"));
        assert!(text.contains("  - \"Pizza\": 1 votes (50.0%)"));
        assert!(text.ends_with("2 voters participated."));
    }
}
