// 📦 Domain records - what a client's dataset is made of
//
// PerformanceRecord: one (day, campaign, ad, age, gender) slice. Immutable once stored.
// CreativeLink: ad name → creative reference. First writer wins.
// ClientDataset: everything the store keeps per client.

use crate::bitacora::BitacoraReport;
use crate::deduplication::record_key;
use crate::locale::parse_date;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// DELIVERY STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryStatus {
    Active,
    Inactive,
    #[default]
    Unknown,
}

impl DeliveryStatus {
    /// Read a delivery cell in either export language
    pub fn parse(raw: &str) -> Self {
        let value = raw.trim().to_lowercase();
        if value.is_empty() {
            return DeliveryStatus::Unknown;
        }

        // "inactive"/"inactivo" contain "activ", check them first
        const INACTIVE: &[&str] = &[
            "inactiv", "paused", "pausad", "off", "not_delivering", "not delivering",
            "no se está publicando", "no se esta publicando", "archived", "archivad",
            "deleted", "eliminad", "completed", "completad", "finalizad",
        ];
        const ACTIVE: &[&str] = &["activ", "on", "delivering", "publicando", "en circulación"];

        if INACTIVE.iter().any(|k| value.contains(k)) {
            DeliveryStatus::Inactive
        } else if ACTIVE.iter().any(|k| value == *k || value.starts_with(k)) {
            DeliveryStatus::Active
        } else {
            DeliveryStatus::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Active => "active",
            DeliveryStatus::Inactive => "inactive",
            DeliveryStatus::Unknown => "unknown",
        }
    }
}

// ============================================================================
// PERFORMANCE RECORD
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceRecord {
    /// `day|campaign|ad|age|gender`
    pub unique_id: String,
    pub client_id: String,
    pub account_name: String,

    // Slice identity
    pub day: String,
    pub campaign_name: String,
    pub ad_set_name: String,
    pub ad_name: String,
    pub age: String,
    pub gender: String,

    // Delivery
    pub spend: f64,
    pub impressions: u64,
    pub reach: u64,
    pub frequency: f64,
    pub clicks: u64,
    pub landing_page_views: u64,

    // Conversions
    pub purchases: u64,
    pub purchase_value: f64,

    // Funnel stages
    pub attention: u64,
    pub interest: u64,
    pub desire: u64,
    pub add_to_cart: u64,
    pub checkout_initiated: u64,

    pub video_avg_play_time: f64,

    pub campaign_delivery: DeliveryStatus,
    pub ad_set_delivery: DeliveryStatus,
    pub ad_delivery: DeliveryStatus,
}

impl PerformanceRecord {
    /// Create a record for one slice; identity key is derived here and never recomputed
    pub fn new(
        client_id: impl Into<String>,
        account_name: impl Into<String>,
        day: impl Into<String>,
        campaign_name: impl Into<String>,
        ad_name: impl Into<String>,
        age: impl Into<String>,
        gender: impl Into<String>,
    ) -> Self {
        let day = day.into();
        let campaign_name = campaign_name.into();
        let ad_name = ad_name.into();
        let age = age.into();
        let gender = gender.into();

        PerformanceRecord {
            unique_id: record_key(&day, &campaign_name, &ad_name, &age, &gender),
            client_id: client_id.into(),
            account_name: account_name.into(),
            day,
            campaign_name,
            ad_name,
            age,
            gender,
            ..Default::default()
        }
    }

    /// Builder: spend and impressions, the two figures almost every test needs
    pub fn with_delivery(mut self, spend: f64, impressions: u64) -> Self {
        self.spend = spend;
        self.impressions = impressions;
        self
    }

    /// Builder: purchases and their value
    pub fn with_purchases(mut self, purchases: u64, purchase_value: f64) -> Self {
        self.purchases = purchases;
        self.purchase_value = purchase_value;
        self
    }

    pub fn date(&self) -> Option<NaiveDate> {
        parse_date(&self.day)
    }

    /// Spend-eligible unless the ad is explicitly not delivering
    pub fn is_active(&self) -> bool {
        self.ad_delivery != DeliveryStatus::Inactive
    }
}

// ============================================================================
// CREATIVE LINK
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreativeLink {
    pub ad_name: String,
    pub thumbnail_url: Option<String>,
    pub preview_link: Option<String>,
    /// Prior analysis, opaque to this crate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<serde_json::Value>,
}

impl CreativeLink {
    pub fn new(ad_name: impl Into<String>) -> Self {
        CreativeLink {
            ad_name: ad_name.into(),
            ..Default::default()
        }
    }
}

// ============================================================================
// CLIENT DATASET
// ============================================================================

/// Everything persisted for one client, loaded and saved as one value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientDataset {
    pub records: BTreeMap<String, PerformanceRecord>,
    pub creative_links: BTreeMap<String, CreativeLink>,
    pub reports: BTreeMap<String, BitacoraReport>,
}

impl ClientDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Records in identity-key order, copied out for read-only use
    pub fn records_snapshot(&self) -> Vec<PerformanceRecord> {
        self.records.values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.creative_links.is_empty() && self.reports.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_status_bilingual() {
        assert_eq!(DeliveryStatus::parse("active"), DeliveryStatus::Active);
        assert_eq!(DeliveryStatus::parse("Activo"), DeliveryStatus::Active);
        assert_eq!(DeliveryStatus::parse("ACTIVE"), DeliveryStatus::Active);
        assert_eq!(DeliveryStatus::parse("inactive"), DeliveryStatus::Inactive);
        assert_eq!(DeliveryStatus::parse("Inactivo"), DeliveryStatus::Inactive);
        assert_eq!(DeliveryStatus::parse("Pausado"), DeliveryStatus::Inactive);
        assert_eq!(DeliveryStatus::parse("not_delivering"), DeliveryStatus::Inactive);
        assert_eq!(DeliveryStatus::parse(""), DeliveryStatus::Unknown);
        assert_eq!(DeliveryStatus::parse("???"), DeliveryStatus::Unknown);
    }

    #[test]
    fn test_record_identity_key() {
        let record = PerformanceRecord::new(
            "client-1", "Tienda Sol", "2024-05-01", "Verano", "Video A", "25-34", "female",
        );
        assert_eq!(record.unique_id, "2024-05-01|Verano|Video A|25-34|female");
        assert_eq!(record.date(), NaiveDate::from_ymd_opt(2024, 5, 1));
        assert!(record.is_active());
    }

    #[test]
    fn test_inactive_record_not_active() {
        let mut record = PerformanceRecord::new("c", "acc", "2024-05-01", "c", "a", "", "");
        record.ad_delivery = DeliveryStatus::Inactive;
        assert!(!record.is_active());
    }
}
