use std::collections::BTreeMap;
use std::env;

use crate::models::Service;

/// Minutes assumed when neither the service nor its category says otherwise.
pub const FALLBACK_DURATION_MINUTES: i64 = 60;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub search_horizon_days: i64,
    pub cancellation_lead_hours: i64,
    pub durations: CategoryDurations,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut durations = CategoryDurations::default();
        if let Ok(raw) = env::var("CATEGORY_DURATIONS") {
            match durations.apply_overrides(&raw) {
                Ok(count) => tracing::info!("loaded {count} category duration overrides"),
                Err(e) => tracing::warn!(error = %e, "ignoring CATEGORY_DURATIONS"),
            }
        }

        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "salonbook.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            search_horizon_days: env::var("SEARCH_HORIZON_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|d| *d > 0)
                .unwrap_or(30),
            cancellation_lead_hours: env::var("CANCELLATION_LEAD_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|h| *h >= 0)
                .unwrap_or(24),
            durations,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            database_url: ":memory:".to_string(),
            admin_token: "changeme".to_string(),
            search_horizon_days: 30,
            cancellation_lead_hours: 24,
            durations: CategoryDurations::default(),
        }
    }
}

/// Default appointment length per service category, in minutes.
///
/// Both the availability search (when no service is given) and booking creation
/// (when the service carries no explicit duration) read from this one table.
#[derive(Clone, Debug)]
pub struct CategoryDurations {
    by_category: BTreeMap<String, i64>,
    fallback: i64,
}

impl Default for CategoryDurations {
    fn default() -> Self {
        let by_category = [
            ("coiffure", 60),
            ("coloration", 120),
            ("soin", 90),
            ("manucure", 45),
            ("maquillage", 60),
            ("epilation", 30),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            by_category,
            fallback: FALLBACK_DURATION_MINUTES,
        }
    }
}

impl CategoryDurations {
    pub fn fallback(&self) -> i64 {
        self.fallback
    }

    pub fn for_category(&self, category: &str) -> i64 {
        self.by_category
            .get(&category.trim().to_lowercase())
            .copied()
            .unwrap_or(self.fallback)
    }

    /// Explicit service duration wins, then the category entry, then the fallback.
    pub fn resolve(&self, service: &Service) -> i64 {
        match service.duration_minutes {
            Some(minutes) if minutes > 0 => minutes,
            _ => self.for_category(&service.category),
        }
    }

    /// Parses `category=minutes,category=minutes` and merges it into the table.
    pub fn apply_overrides(&mut self, raw: &str) -> anyhow::Result<usize> {
        let mut parsed = Vec::new();
        for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (category, minutes) = pair
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("expected category=minutes, got: {pair}"))?;
            let minutes: i64 = minutes
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid minutes in: {pair}"))?;
            if minutes <= 0 {
                return Err(anyhow::anyhow!("duration must be positive in: {pair}"));
            }
            parsed.push((category.trim().to_lowercase(), minutes));
        }

        let count = parsed.len();
        self.by_category.extend(parsed);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(category: &str, duration: Option<i64>) -> Service {
        Service {
            id: "svc-1".to_string(),
            name: "Test".to_string(),
            price: 35.0,
            category: category.to_string(),
            duration_minutes: duration,
            is_active: true,
        }
    }

    #[test]
    fn test_category_lookup() {
        let table = CategoryDurations::default();
        assert_eq!(table.for_category("coloration"), 120);
        assert_eq!(table.for_category("  Manucure "), 45);
        assert_eq!(table.for_category("unknown"), FALLBACK_DURATION_MINUTES);
    }

    #[test]
    fn test_explicit_duration_wins() {
        let table = CategoryDurations::default();
        assert_eq!(table.resolve(&service("soin", Some(75))), 75);
        assert_eq!(table.resolve(&service("soin", None)), 90);
        assert_eq!(table.resolve(&service("soin", Some(0))), 90);
    }

    #[test]
    fn test_overrides() {
        let mut table = CategoryDurations::default();
        let count = table.apply_overrides("soin=100, barbe=20").unwrap();
        assert_eq!(count, 2);
        assert_eq!(table.for_category("soin"), 100);
        assert_eq!(table.for_category("barbe"), 20);
    }

    #[test]
    fn test_invalid_overrides_leave_table_untouched() {
        let mut table = CategoryDurations::default();
        assert!(table.apply_overrides("soin=100,barbe").is_err());
        assert!(table.apply_overrides("soin=-5").is_err());
        assert_eq!(table.for_category("soin"), 90);
    }
}
