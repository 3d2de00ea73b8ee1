// 📊 Aggregation Engine - per-ad and per-account rollups over a snapshot
//
// Rows are per (day, campaign, ad, age, gender) slice. Every ratio is
// derived from summed counters, never averaged from per-row ratios, and the
// per-row averages that exist (frequency, video play time) are
// impression-weighted.

use crate::records::{CreativeLink, PerformanceRecord};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// QUERY
// ============================================================================

/// Inclusive day window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Bounds given in reverse are swapped
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            DateRange { start, end }
        } else {
            DateRange { start: end, end: start }
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn days(&self) -> u64 {
        (self.end - self.start).num_days().unsigned_abs() + 1
    }

    /// Window of the same length ending the day before this one starts
    pub fn previous(&self) -> DateRange {
        let end = self.start.checked_sub_days(Days::new(1)).unwrap_or(NaiveDate::MIN);
        let start = end
            .checked_sub_days(Days::new(self.days() - 1))
            .unwrap_or(NaiveDate::MIN);
        DateRange { start, end }
    }
}

/// Spend-eligible rows only by default: rows whose ad is explicitly not
/// delivering are left out unless the caller asks for `include_inactive()`.
/// `total_active_days` ignores this filter and the range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationQuery {
    pub range: Option<DateRange>,
    pub active_only: bool,
}

impl Default for AggregationQuery {
    fn default() -> Self {
        AggregationQuery {
            range: None,
            active_only: true,
        }
    }
}

impl AggregationQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_range(mut self, range: DateRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn include_inactive(mut self) -> Self {
        self.active_only = false;
        self
    }

    /// Rows with an unparseable day never match a ranged query
    pub fn matches(&self, record: &PerformanceRecord) -> bool {
        if self.active_only && !record.is_active() {
            return false;
        }
        match self.range {
            Some(range) => record.date().is_some_and(|d| range.contains(d)),
            None => true,
        }
    }
}

// ============================================================================
// TOTALS & DERIVED METRICS
// ============================================================================

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Summed raw counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricTotals {
    pub spend: f64,
    pub impressions: u64,
    pub reach: u64,
    pub clicks: u64,
    pub landing_page_views: u64,
    pub purchases: u64,
    pub purchase_value: f64,
    pub attention: u64,
    pub interest: u64,
    pub desire: u64,
    pub add_to_cart: u64,
    pub checkout_initiated: u64,
    #[serde(skip)]
    frequency_weighted: f64,
    #[serde(skip)]
    video_play_time_weighted: f64,
}

impl MetricTotals {
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a PerformanceRecord>,
    {
        let mut totals = MetricTotals::default();
        for record in records {
            totals.add(record);
        }
        totals
    }

    pub fn add(&mut self, r: &PerformanceRecord) {
        self.spend += r.spend;
        self.impressions += r.impressions;
        self.reach += r.reach;
        self.clicks += r.clicks;
        self.landing_page_views += r.landing_page_views;
        self.purchases += r.purchases;
        self.purchase_value += r.purchase_value;
        self.attention += r.attention;
        self.interest += r.interest;
        self.desire += r.desire;
        self.add_to_cart += r.add_to_cart;
        self.checkout_initiated += r.checkout_initiated;

        let weight = r.impressions as f64;
        self.frequency_weighted += r.frequency * weight;
        self.video_play_time_weighted += r.video_avg_play_time * weight;
    }

    pub fn roas(&self) -> f64 {
        ratio(self.purchase_value, self.spend)
    }

    pub fn ctr(&self) -> f64 {
        ratio(self.clicks as f64, self.impressions as f64)
    }

    pub fn cpm(&self) -> f64 {
        ratio(self.spend, self.impressions as f64) * 1000.0
    }

    pub fn cpc(&self) -> f64 {
        ratio(self.spend, self.clicks as f64)
    }

    pub fn cpa(&self) -> f64 {
        ratio(self.spend, self.purchases as f64)
    }

    pub fn conversion_rate(&self) -> f64 {
        ratio(self.purchases as f64, self.clicks as f64)
    }

    /// Impression-weighted
    pub fn frequency(&self) -> f64 {
        ratio(self.frequency_weighted, self.impressions as f64)
    }

    /// Impression-weighted
    pub fn video_avg_play_time(&self) -> f64 {
        ratio(self.video_play_time_weighted, self.impressions as f64)
    }

    pub fn derived(&self) -> DerivedMetrics {
        DerivedMetrics {
            roas: self.roas(),
            ctr: self.ctr(),
            cpm: self.cpm(),
            cpc: self.cpc(),
            cpa: self.cpa(),
            conversion_rate: self.conversion_rate(),
            frequency: self.frequency(),
            video_avg_play_time: self.video_avg_play_time(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedMetrics {
    pub roas: f64,
    pub ctr: f64,
    pub cpm: f64,
    pub cpc: f64,
    pub cpa: f64,
    pub conversion_rate: f64,
    pub frequency: f64,
    pub video_avg_play_time: f64,
}

/// Distinct days with spend > 0
pub fn active_days<'a, I>(records: I) -> usize
where
    I: IntoIterator<Item = &'a PerformanceRecord>,
{
    records
        .into_iter()
        .filter(|r| r.spend > 0.0)
        .map(|r| r.day.as_str())
        .collect::<BTreeSet<_>>()
        .len()
}

/// First and last parseable day
pub fn date_span<'a, I>(records: I) -> Option<(NaiveDate, NaiveDate)>
where
    I: IntoIterator<Item = &'a PerformanceRecord>,
{
    records
        .into_iter()
        .filter_map(PerformanceRecord::date)
        .fold(None, |span, d| match span {
            None => Some((d, d)),
            Some((lo, hi)) => Some((lo.min(d), hi.max(d))),
        })
}

// ============================================================================
// FUNNEL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FunnelStage {
    Impressions,
    Reach,
    LandingPageViews,
    Attention,
    Interest,
    Desire,
    AddToCart,
    CheckoutInitiated,
    Purchase,
}

impl FunnelStage {
    pub const ORDER: [FunnelStage; 9] = [
        FunnelStage::Impressions,
        FunnelStage::Reach,
        FunnelStage::LandingPageViews,
        FunnelStage::Attention,
        FunnelStage::Interest,
        FunnelStage::Desire,
        FunnelStage::AddToCart,
        FunnelStage::CheckoutInitiated,
        FunnelStage::Purchase,
    ];

    pub fn name(&self) -> &str {
        match self {
            FunnelStage::Impressions => "Impressions",
            FunnelStage::Reach => "Reach",
            FunnelStage::LandingPageViews => "Landing page views",
            FunnelStage::Attention => "Attention",
            FunnelStage::Interest => "Interest",
            FunnelStage::Desire => "Desire",
            FunnelStage::AddToCart => "Add to cart",
            FunnelStage::CheckoutInitiated => "Checkout initiated",
            FunnelStage::Purchase => "Purchase",
        }
    }

    fn value(&self, totals: &MetricTotals) -> u64 {
        match self {
            FunnelStage::Impressions => totals.impressions,
            FunnelStage::Reach => totals.reach,
            FunnelStage::LandingPageViews => totals.landing_page_views,
            FunnelStage::Attention => totals.attention,
            FunnelStage::Interest => totals.interest,
            FunnelStage::Desire => totals.desire,
            FunnelStage::AddToCart => totals.add_to_cart,
            FunnelStage::CheckoutInitiated => totals.checkout_initiated,
            FunnelStage::Purchase => totals.purchases,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunnelStep {
    pub stage: FunnelStage,
    pub value: u64,
    /// Loss from the previous step, `None` on the first step
    pub drop_off: Option<f64>,
}

/// `1 - next/previous`; undefined when there is nothing to drop from
pub fn drop_off(previous: u64, next: u64) -> Option<f64> {
    if previous == 0 {
        return None;
    }
    Some(1.0 - next as f64 / previous as f64)
}

/// Non-zero stages in funnel order
pub fn build_funnel(totals: &MetricTotals) -> Vec<FunnelStep> {
    let mut steps: Vec<FunnelStep> = Vec::new();
    for stage in FunnelStage::ORDER {
        let value = stage.value(totals);
        if value == 0 {
            continue;
        }
        let drop = steps.last().and_then(|prev| drop_off(prev.value, value));
        steps.push(FunnelStep {
            stage,
            value,
            drop_off: drop,
        });
    }
    steps
}

// ============================================================================
// PER-AD ROLLUP
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedAdPerformance {
    pub ad_name: String,
    /// Campaigns the ad ran in, sorted
    pub campaigns: Vec<String>,
    pub totals: MetricTotals,
    pub metrics: DerivedMetrics,
    pub funnel: Vec<FunnelStep>,
    /// Distinct spending days over the ad's whole history, ignoring the query
    pub total_active_days: usize,
    pub first_day: Option<NaiveDate>,
    pub last_day: Option<NaiveDate>,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creative: Option<CreativeLink>,
}

pub fn aggregate_by_ad(
    records: &[PerformanceRecord],
    links: &BTreeMap<String, CreativeLink>,
    query: &AggregationQuery,
) -> Vec<AggregatedAdPerformance> {
    let mut history: BTreeMap<&str, Vec<&PerformanceRecord>> = BTreeMap::new();
    let mut selected: BTreeMap<&str, Vec<&PerformanceRecord>> = BTreeMap::new();

    for record in records {
        history.entry(record.ad_name.as_str()).or_default().push(record);
        if query.matches(record) {
            selected.entry(record.ad_name.as_str()).or_default().push(record);
        }
    }

    let mut ads: Vec<AggregatedAdPerformance> = selected
        .into_iter()
        .map(|(ad_name, rows)| {
            let totals = MetricTotals::from_records(rows.iter().copied());
            let span = date_span(rows.iter().copied());
            let campaigns: BTreeSet<&str> = rows.iter().map(|r| r.campaign_name.as_str()).collect();
            let total_active_days = history
                .get(ad_name)
                .map(|all| active_days(all.iter().copied()))
                .unwrap_or(0);

            AggregatedAdPerformance {
                ad_name: ad_name.to_string(),
                campaigns: campaigns.into_iter().map(String::from).collect(),
                metrics: totals.derived(),
                funnel: build_funnel(&totals),
                totals,
                total_active_days,
                first_day: span.map(|(first, _)| first),
                last_day: span.map(|(_, last)| last),
                is_active: rows.iter().any(|r| r.is_active()),
                creative: links.get(ad_name).cloned(),
            }
        })
        .collect();

    ads.sort_by(|a, b| {
        b.totals
            .spend
            .total_cmp(&a.totals.spend)
            .then_with(|| a.ad_name.cmp(&b.ad_name))
    });
    ads
}

// ============================================================================
// ACCOUNT SUMMARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub range: Option<DateRange>,
    pub totals: MetricTotals,
    pub metrics: DerivedMetrics,
    pub funnel: Vec<FunnelStep>,
    pub ad_count: usize,
    pub active_days: usize,
    pub first_day: Option<NaiveDate>,
    pub last_day: Option<NaiveDate>,
}

pub fn summarize_account(records: &[PerformanceRecord], query: &AggregationQuery) -> AccountSummary {
    let rows: Vec<&PerformanceRecord> = records.iter().filter(|r| query.matches(r)).collect();
    let totals = MetricTotals::from_records(rows.iter().copied());
    let span = date_span(rows.iter().copied());
    let ads: BTreeSet<&str> = rows.iter().map(|r| r.ad_name.as_str()).collect();

    AccountSummary {
        range: query.range,
        metrics: totals.derived(),
        funnel: build_funnel(&totals),
        ad_count: ads.len(),
        active_days: active_days(rows.iter().copied()),
        first_day: span.map(|(first, _)| first),
        last_day: span.map(|(_, last)| last),
        totals,
    }
}

// ============================================================================
// PERIOD COMPARISON
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "pct")]
pub enum Change {
    /// Fractional increase
    Up(f64),
    /// Fractional decrease, positive
    Down(f64),
    Stable,
    /// Previous period was zero
    Undefined,
}

impl Change {
    pub fn between(previous: f64, current: f64) -> Change {
        if previous == 0.0 {
            return if current == 0.0 {
                Change::Stable
            } else {
                Change::Undefined
            };
        }

        let pct = (current - previous) / previous.abs();
        if pct.abs() < 1e-9 {
            Change::Stable
        } else if pct > 0.0 {
            Change::Up(pct)
        } else {
            Change::Down(-pct)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricChange {
    pub metric: String,
    pub current: f64,
    pub previous: f64,
    pub change: Change,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodComparison {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_name: Option<String>,
    pub current_range: DateRange,
    pub previous_range: DateRange,
    pub current: MetricTotals,
    pub previous: MetricTotals,
    pub changes: Vec<MetricChange>,
}

impl PeriodComparison {
    pub fn change_for(&self, metric: &str) -> Option<&MetricChange> {
        self.changes.iter().find(|c| c.metric == metric)
    }
}

fn compared_metrics(t: &MetricTotals) -> [(&'static str, f64); 11] {
    [
        ("spend", t.spend),
        ("impressions", t.impressions as f64),
        ("clicks", t.clicks as f64),
        ("purchases", t.purchases as f64),
        ("purchaseValue", t.purchase_value),
        ("roas", t.roas()),
        ("ctr", t.ctr()),
        ("cpm", t.cpm()),
        ("cpc", t.cpc()),
        ("cpa", t.cpa()),
        ("conversionRate", t.conversion_rate()),
    ]
}

/// Compare `current` with the equally long window right before it
pub fn compare_periods(
    records: &[PerformanceRecord],
    ad_name: Option<&str>,
    current: DateRange,
) -> PeriodComparison {
    let previous = current.previous();
    let totals_in = |range: DateRange| {
        let query = AggregationQuery::new().with_range(range);
        MetricTotals::from_records(
            records
                .iter()
                .filter(|r| ad_name.map_or(true, |name| r.ad_name == name))
                .filter(|r| query.matches(r)),
        )
    };

    let current_totals = totals_in(current);
    let previous_totals = totals_in(previous);

    let changes = compared_metrics(&current_totals)
        .into_iter()
        .zip(compared_metrics(&previous_totals))
        .map(|((metric, cur), (_, prev))| MetricChange {
            metric: metric.to_string(),
            current: cur,
            previous: prev,
            change: Change::between(prev, cur),
        })
        .collect();

    PeriodComparison {
        ad_name: ad_name.map(String::from),
        current_range: current,
        previous_range: previous,
        current: current_totals,
        previous: previous_totals,
        changes,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::DeliveryStatus;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn create_test_record(day: &str, ad: &str, age: &str, spend: f64, impressions: u64) -> PerformanceRecord {
        PerformanceRecord::new("client-1", "Tienda Sol", day, "Verano", ad, age, "female")
            .with_delivery(spend, impressions)
    }

    #[test]
    fn test_cpm_from_sums_not_mean() {
        let records = vec![
            create_test_record("2024-05-01", "Video A", "18-24", 10.0, 100),
            create_test_record("2024-05-01", "Video A", "25-34", 90.0, 900),
        ];
        let ads = aggregate_by_ad(&records, &BTreeMap::new(), &AggregationQuery::new());

        assert_eq!(ads.len(), 1);
        assert!((ads[0].metrics.cpm - 100.0).abs() < 1e-9);
        assert_eq!(ads[0].totals.impressions, 1000);
    }

    #[test]
    fn test_ratios_from_sums() {
        let mut a = create_test_record("2024-05-01", "A", "18-24", 20.0, 1000).with_purchases(2, 100.0);
        a.clicks = 40;
        let mut b = create_test_record("2024-05-02", "A", "18-24", 30.0, 3000).with_purchases(3, 50.0);
        b.clicks = 10;

        let totals = MetricTotals::from_records([&a, &b]);
        let m = totals.derived();
        assert!((m.roas - 3.0).abs() < 1e-9);
        assert!((m.ctr - 50.0 / 4000.0).abs() < 1e-12);
        assert!((m.cpc - 1.0).abs() < 1e-9);
        assert!((m.cpa - 10.0).abs() < 1e-9);
        assert!((m.conversion_rate - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_frequency() {
        let mut a = create_test_record("2024-05-01", "A", "18-24", 1.0, 100);
        a.frequency = 1.0;
        a.video_avg_play_time = 2.0;
        let mut b = create_test_record("2024-05-01", "A", "25-34", 1.0, 300);
        b.frequency = 3.0;
        b.video_avg_play_time = 6.0;

        let totals = MetricTotals::from_records([&a, &b]);
        assert!((totals.frequency() - 2.5).abs() < 1e-9);
        assert!((totals.video_avg_play_time() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_denominators_give_zero() {
        let m = MetricTotals::default().derived();
        assert_eq!(m, DerivedMetrics::default());
        assert!(m.cpm.is_finite());
    }

    #[test]
    fn test_funnel_order_and_drop_off() {
        let totals = MetricTotals {
            impressions: 1000,
            reach: 500,
            landing_page_views: 0,
            add_to_cart: 50,
            purchases: 10,
            ..Default::default()
        };
        let funnel = build_funnel(&totals);
        let stages: Vec<_> = funnel.iter().map(|s| s.stage).collect();

        assert_eq!(
            stages,
            vec![
                FunnelStage::Impressions,
                FunnelStage::Reach,
                FunnelStage::AddToCart,
                FunnelStage::Purchase
            ]
        );
        assert_eq!(funnel[0].drop_off, None);
        assert!((funnel[1].drop_off.unwrap() - 0.5).abs() < 1e-9);
        assert!((funnel[2].drop_off.unwrap() - 0.9).abs() < 1e-9);
        assert!((funnel[3].drop_off.unwrap() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_drop_off_zero_predecessor_is_undefined() {
        assert_eq!(drop_off(0, 25), None);
        assert_eq!(drop_off(0, 0), None);
        assert!(build_funnel(&MetricTotals::default()).is_empty());
    }

    #[test]
    fn test_active_days_use_full_history() {
        let records = vec![
            create_test_record("2024-05-01", "A", "18-24", 5.0, 10),
            create_test_record("2024-05-01", "A", "25-34", 5.0, 10),
            create_test_record("2024-05-02", "A", "18-24", 0.0, 10),
            create_test_record("2024-06-01", "A", "18-24", 5.0, 10),
        ];
        let query = AggregationQuery::new().with_range(DateRange::new(date(2024, 6, 1), date(2024, 6, 30)));
        let ads = aggregate_by_ad(&records, &BTreeMap::new(), &query);

        assert_eq!(ads[0].totals.spend, 5.0);
        assert_eq!(ads[0].total_active_days, 2);
        assert_eq!(ads[0].first_day, Some(date(2024, 6, 1)));
    }

    #[test]
    fn test_range_excludes_unparseable_days() {
        let records = vec![
            create_test_record("sin fecha", "A", "18-24", 5.0, 10),
            create_test_record("2024-05-01", "B", "18-24", 5.0, 10),
        ];
        let ranged = AggregationQuery::new().with_range(DateRange::new(date(2024, 1, 1), date(2024, 12, 31)));
        assert_eq!(aggregate_by_ad(&records, &BTreeMap::new(), &ranged).len(), 1);
        assert_eq!(aggregate_by_ad(&records, &BTreeMap::new(), &AggregationQuery::new()).len(), 2);
    }

    #[test]
    fn test_inactive_rows_excluded_by_default_and_sorting() {
        let mut paused = create_test_record("2024-05-01", "Paused", "18-24", 500.0, 10);
        paused.ad_delivery = DeliveryStatus::Inactive;
        let records = vec![
            paused,
            create_test_record("2024-05-01", "Beta", "18-24", 50.0, 10),
            create_test_record("2024-05-01", "Alfa", "18-24", 50.0, 10),
            create_test_record("2024-05-01", "Top", "18-24", 80.0, 10),
        ];

        let all = aggregate_by_ad(&records, &BTreeMap::new(), &AggregationQuery::new().include_inactive());
        let names: Vec<_> = all.iter().map(|a| a.ad_name.as_str()).collect();
        assert_eq!(names, vec!["Paused", "Top", "Alfa", "Beta"]);
        assert!(!all[0].is_active);

        let active = aggregate_by_ad(&records, &BTreeMap::new(), &AggregationQuery::new());
        assert_eq!(active.len(), 3);
        assert!(active.iter().all(|a| a.ad_name != "Paused"));
    }

    #[test]
    fn test_creative_attached() {
        let mut links = BTreeMap::new();
        links.insert("A".to_string(), CreativeLink::new("A"));
        let records = vec![create_test_record("2024-05-01", "A", "18-24", 1.0, 1)];
        let ads = aggregate_by_ad(&records, &links, &AggregationQuery::new());
        assert_eq!(ads[0].creative.as_ref().map(|c| c.ad_name.as_str()), Some("A"));
    }

    #[test]
    fn test_summarize_account() {
        let records = vec![
            create_test_record("2024-05-01", "A", "18-24", 10.0, 100),
            create_test_record("2024-05-02", "B", "18-24", 90.0, 900),
            create_test_record("2024-05-03", "B", "25-34", 0.0, 50),
        ];
        let summary = summarize_account(&records, &AggregationQuery::new());

        assert_eq!(summary.ad_count, 2);
        assert_eq!(summary.active_days, 2);
        assert_eq!(summary.totals.impressions, 1050);
        assert_eq!(summary.first_day, Some(date(2024, 5, 1)));
        assert_eq!(summary.last_day, Some(date(2024, 5, 3)));
    }

    #[test]
    fn test_previous_range_same_length() {
        let current = DateRange::new(date(2024, 5, 8), date(2024, 5, 14));
        let previous = current.previous();
        assert_eq!(previous, DateRange::new(date(2024, 5, 1), date(2024, 5, 7)));
        assert_eq!(previous.days(), current.days());

        let reversed = DateRange::new(date(2024, 5, 14), date(2024, 5, 8));
        assert_eq!(reversed, current);
    }

    #[test]
    fn test_change_between() {
        assert_eq!(Change::between(0.0, 5.0), Change::Undefined);
        assert_eq!(Change::between(0.0, 0.0), Change::Stable);
        assert_eq!(Change::between(10.0, 10.0), Change::Stable);
        assert_eq!(Change::between(10.0, 15.0), Change::Up(0.5));
        assert_eq!(Change::between(10.0, 5.0), Change::Down(0.5));
    }

    #[test]
    fn test_compare_periods() {
        let records = vec![
            create_test_record("2024-05-01", "A", "18-24", 10.0, 100),
            create_test_record("2024-05-02", "A", "18-24", 20.0, 100),
            create_test_record("2024-05-02", "B", "18-24", 99.0, 100),
        ];
        let current = DateRange::new(date(2024, 5, 2), date(2024, 5, 2));

        let comparison = compare_periods(&records, Some("A"), current);
        assert_eq!(comparison.previous_range, DateRange::new(date(2024, 5, 1), date(2024, 5, 1)));
        assert_eq!(comparison.current.spend, 20.0);
        assert_eq!(comparison.previous.spend, 10.0);
        assert_eq!(comparison.change_for("spend").unwrap().change, Change::Up(1.0));
        assert_eq!(comparison.change_for("purchases").unwrap().change, Change::Stable);

        let whole = compare_periods(&records, None, current);
        assert_eq!(whole.current.spend, 119.0);
    }

    #[test]
    fn test_compare_periods_undefined_when_previous_empty() {
        let records = vec![create_test_record("2024-05-02", "A", "18-24", 20.0, 100)];
        let current = DateRange::new(date(2024, 5, 2), date(2024, 5, 2));
        let comparison = compare_periods(&records, None, current);
        assert_eq!(comparison.change_for("spend").unwrap().change, Change::Undefined);
    }
}
