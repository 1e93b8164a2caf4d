use serde::{Deserialize, Serialize};

/// A catalog category ("Hiking", "Food & Drink", ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: u64,
    pub name: String,
    pub slug: String,
    /// Categories the back office has enabled for display.
    #[serde(default)]
    pub active: bool,
}

/// A bookable travel experience within a category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub id: u64,
    pub category_id: u64,
    pub title: String,
    pub location: String,
    pub price_cents: u64,
    #[serde(default)]
    pub rating: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_active_defaults_to_false() {
        let category: Category =
            serde_json::from_str(r#"{"id": 3, "name": "Hiking", "slug": "hiking"}"#).unwrap();
        assert!(!category.active);
    }

    #[test]
    fn experience_round_trips() {
        let experience = Experience {
            id: 11,
            category_id: 3,
            title: "Sunrise volcano hike".to_string(),
            location: "Bali".to_string(),
            price_cents: 7500,
            rating: 4.8,
        };
        let json = serde_json::to_string(&experience).unwrap();
        let back: Experience = serde_json::from_str(&json).unwrap();
        assert_eq!(back, experience);
    }
}
