//! Scan-wide resource limits.

/// Counts resources claimed for fetching against `max_resources`. Owned by
/// the coordinator, which is the only writer.
#[derive(Debug)]
pub struct ResourceBudget {
    max_resources: usize,
    claimed: usize,
}

impl ResourceBudget {
    pub fn new(max_resources: usize) -> Self {
        Self {
            max_resources,
            claimed: 0,
        }
    }

    /// Take one slot; `false` once the cap is reached.
    pub fn try_claim(&mut self) -> bool {
        if self.claimed >= self.max_resources {
            return false;
        }
        self.claimed += 1;
        true
    }

    pub fn max_resources(&self) -> usize {
        self.max_resources
    }
}

/// Cut `body` down to `max_bytes`. Returns the original length when
/// anything was dropped.
pub fn clamp_body(body: &mut Vec<u8>, max_bytes: usize) -> Option<usize> {
    if body.len() <= max_bytes {
        return None;
    }
    let original = body.len();
    body.truncate(max_bytes);
    Some(original)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_caps_claims() {
        let mut budget = ResourceBudget::new(2);
        assert!(budget.try_claim());
        assert!(budget.try_claim());
        assert!(!budget.try_claim());
        assert!(!budget.try_claim());
        assert_eq!(budget.max_resources(), 2);
    }

    #[test]
    fn test_clamp_body() {
        let mut body = vec![0u8; 10];
        assert_eq!(clamp_body(&mut body, 16), None);
        assert_eq!(clamp_body(&mut body, 4), Some(10));
        assert_eq!(body.len(), 4);
    }
}
