use crate::config::PriorityConfig;
use crate::queue::Priority;

/// Keyword rules: any high keyword wins, then any low keyword, else medium.
#[derive(Debug, Clone)]
pub struct PriorityRules {
    high: Vec<String>,
    low: Vec<String>,
}

impl PriorityRules {
    pub fn new(high: &[String], low: &[String]) -> Self {
        let normalize = |words: &[String]| -> Vec<String> {
            words
                .iter()
                .map(|word| word.trim().to_lowercase())
                .filter(|word| !word.is_empty())
                .collect()
        };
        Self {
            high: normalize(high),
            low: normalize(low),
        }
    }

    pub fn classify(&self, text: &str) -> Priority {
        let text = text.to_lowercase();
        if self.high.iter().any(|word| text.contains(word.as_str())) {
            Priority::High
        } else if self.low.iter().any(|word| text.contains(word.as_str())) {
            Priority::Low
        } else {
            Priority::Medium
        }
    }
}

impl From<&PriorityConfig> for PriorityRules {
    fn from(config: &PriorityConfig) -> Self {
        Self::new(&config.high_keywords, &config.low_keywords)
    }
}

impl Default for PriorityRules {
    fn default() -> Self {
        Self::from(&PriorityConfig::default())
    }
}
