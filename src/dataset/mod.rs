//! Synthetic seller dataset
//!
//! A deterministic, seed-driven stand-in for the analytics warehouse:
//! a product catalog plus one row per product per day carrying sales,
//! units, and sessions. `conversion_rate` is always derived as
//! `units / sessions`. All read accessors are day-granular and range-based;
//! the engine never mutates the dataset.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Aggregatable metrics over the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Sales,
    Units,
    Sessions,
    ConversionRate,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Sales => "sales",
            Metric::Units => "units",
            Metric::Sessions => "sessions",
            Metric::ConversionRate => "conversion_rate",
        }
    }

    /// Parse a metric name, folding common synonyms onto the canonical
    /// domain: revenue/gmv → sales, traffic/visits → sessions,
    /// conversion/cvr → conversion_rate.
    pub fn parse(raw: &str) -> Option<Metric> {
        match raw.trim().to_lowercase().as_str() {
            "sales" | "revenue" | "gmv" => Some(Metric::Sales),
            "units" => Some(Metric::Units),
            "sessions" | "traffic" | "visits" | "visit" => Some(Metric::Sessions),
            "conversion_rate" | "conversion" | "cvr" => Some(Metric::ConversionRate),
            _ => None,
        }
    }
}

/// Catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub category: String,
}

/// One product-day of raw figures.
#[derive(Debug, Clone)]
struct DailyRow {
    product_id: i64,
    date: NaiveDate,
    sales: f64,
    units: i64,
    sessions: i64,
}

/// Ranked row returned by `top_products`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopProductRow {
    pub product_id: i64,
    pub product_name: String,
    pub metric: Metric,
    pub metric_value: f64,
}

/// One point of a per-product series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Daily series for one product.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSeries {
    pub product_id: i64,
    pub product_name: String,
    pub metric: Metric,
    pub points: Vec<SeriesPoint>,
}

/// Category average returned by `benchmark`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkResult {
    pub metric: Metric,
    pub category: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub average: f64,
    pub product_count: usize,
}

/// Start-to-end delta over an ordered series of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSummary {
    pub start_value: f64,
    pub end_value: f64,
    pub abs_change: f64,
    pub pct_change: f64,
}

const CATALOG: &[(&str, &str)] = &[
    ("Wireless Earbuds", "electronics"),
    ("Smart Speaker", "electronics"),
    ("USB-C Hub", "electronics"),
    ("Fitness Tracker", "electronics"),
    ("Ceramic Mug Set", "home"),
    ("Linen Throw Pillow", "home"),
    ("Cast Iron Skillet", "home"),
    ("LED Desk Lamp", "home"),
    ("Vitamin C Serum", "beauty"),
    ("Bamboo Hair Brush", "beauty"),
    ("Clay Face Mask", "beauty"),
    ("Beard Oil Kit", "beauty"),
    ("Yoga Mat", "sports"),
    ("Resistance Bands", "sports"),
    ("Insulated Bottle", "sports"),
    ("Trail Backpack", "sports"),
    ("Wooden Puzzle", "toys"),
    ("Building Blocks", "toys"),
    ("Plush Dinosaur", "toys"),
    ("Craft Kit", "toys"),
    ("Espresso Beans", "grocery"),
    ("Matcha Powder", "grocery"),
    ("Trail Mix Pack", "grocery"),
    ("Hot Sauce Trio", "grocery"),
];

/// The dataset itself: catalog + daily rows over a contiguous range.
pub struct SellerDataset {
    products: Vec<Product>,
    rows: Vec<DailyRow>,
    start: NaiveDate,
    end: NaiveDate,
}

impl SellerDataset {
    /// Generate a dataset covering `days` days starting at `start`.
    /// Identical `(seed, start, days)` always produce identical figures.
    pub fn generate(seed: u64, start: NaiveDate, days: u32) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);

        let products: Vec<Product> = CATALOG
            .iter()
            .enumerate()
            .map(|(i, (name, category))| Product {
                id: (i + 1) as i64,
                name: (*name).to_string(),
                category: (*category).to_string(),
            })
            .collect();

        // Per-product demand shape drawn once so day rows stay correlated
        let profiles: Vec<(f64, f64, f64)> = products
            .iter()
            .map(|_| {
                let base_sessions = rng.gen_range(60.0..360.0);
                let price = rng.gen_range(9.0..130.0);
                let conversion = rng.gen_range(0.02..0.09);
                (base_sessions, price, conversion)
            })
            .collect();

        let mut rows = Vec::with_capacity(products.len() * days as usize);
        for day in 0..days {
            let date = start + Duration::days(day as i64);
            let weekend_factor = match date.weekday() {
                Weekday::Sat | Weekday::Sun => 0.85,
                _ => 1.0,
            };
            for (product, (base_sessions, price, conversion)) in
                products.iter().zip(profiles.iter())
            {
                let traffic_noise: f64 = rng.gen_range(0.75..1.25);
                let sessions = (base_sessions * weekend_factor * traffic_noise).round() as i64;
                let conv_noise: f64 = rng.gen_range(0.6..1.4);
                let units = ((sessions as f64) * conversion * conv_noise).round() as i64;
                let price_noise: f64 = rng.gen_range(0.95..1.05);
                let sales = (units as f64) * price * price_noise;

                rows.push(DailyRow {
                    product_id: product.id,
                    date,
                    sales,
                    units: units.max(0),
                    sessions: sessions.max(0),
                });
            }
        }

        let end = start + Duration::days(days.saturating_sub(1) as i64);
        Self {
            products,
            rows,
            start,
            end,
        }
    }

    /// First day with data.
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Last day with data.
    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Catalog listing, optionally filtered by category.
    pub fn list_products(&self, category: Option<&str>, limit: usize) -> Vec<Product> {
        self.products
            .iter()
            .filter(|p| category.map_or(true, |c| p.category.eq_ignore_ascii_case(c)))
            .take(limit)
            .cloned()
            .collect()
    }

    fn product(&self, id: i64) -> Option<&Product> {
        self.products.iter().find(|p| p.id == id)
    }

    /// Aggregate one product's metric over a date range (inclusive).
    fn metric_total(&self, product_id: i64, metric: Metric, start: NaiveDate, end: NaiveDate) -> f64 {
        let mut sales = 0.0;
        let mut units = 0i64;
        let mut sessions = 0i64;
        for row in self
            .rows
            .iter()
            .filter(|r| r.product_id == product_id && r.date >= start && r.date <= end)
        {
            sales += row.sales;
            units += row.units;
            sessions += row.sessions;
        }
        match metric {
            Metric::Sales => sales,
            Metric::Units => units as f64,
            Metric::Sessions => sessions as f64,
            Metric::ConversionRate => {
                if sessions == 0 {
                    0.0
                } else {
                    units as f64 / sessions as f64
                }
            }
        }
    }

    /// Products ranked descending by the metric over the range. Ties break
    /// on product id so rankings stay deterministic.
    pub fn top_products(
        &self,
        metric: Metric,
        start: NaiveDate,
        end: NaiveDate,
        limit: usize,
    ) -> Vec<TopProductRow> {
        let mut ranked: Vec<TopProductRow> = self
            .products
            .iter()
            .map(|p| TopProductRow {
                product_id: p.id,
                product_name: p.name.clone(),
                metric,
                metric_value: self.metric_total(p.id, metric, start, end),
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.metric_value
                .partial_cmp(&a.metric_value)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.product_id.cmp(&b.product_id))
        });
        ranked.truncate(limit);
        ranked
    }

    /// Daily series for the requested products, in request order. Unknown
    /// product ids are skipped.
    pub fn timeseries(
        &self,
        metric: Metric,
        product_ids: &[i64],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Vec<ProductSeries> {
        product_ids
            .iter()
            .filter_map(|&id| {
                let product = self.product(id)?;
                let points: Vec<SeriesPoint> = self
                    .rows
                    .iter()
                    .filter(|r| r.product_id == id && r.date >= start && r.date <= end)
                    .map(|r| SeriesPoint {
                        date: r.date,
                        value: match metric {
                            Metric::Sales => r.sales,
                            Metric::Units => r.units as f64,
                            Metric::Sessions => r.sessions as f64,
                            Metric::ConversionRate => {
                                if r.sessions == 0 {
                                    0.0
                                } else {
                                    r.units as f64 / r.sessions as f64
                                }
                            }
                        },
                    })
                    .collect();
                Some(ProductSeries {
                    product_id: id,
                    product_name: product.name.clone(),
                    metric,
                    points,
                })
            })
            .collect()
    }

    /// Mean of per-product metric totals across a category.
    pub fn benchmark(
        &self,
        metric: Metric,
        category: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> BenchmarkResult {
        let members: Vec<&Product> = self
            .products
            .iter()
            .filter(|p| p.category.eq_ignore_ascii_case(category))
            .collect();

        let average = if members.is_empty() {
            0.0
        } else {
            members
                .iter()
                .map(|p| self.metric_total(p.id, metric, start, end))
                .sum::<f64>()
                / members.len() as f64
        };

        BenchmarkResult {
            metric,
            category: category.to_lowercase(),
            start_date: start,
            end_date: end,
            average,
            product_count: members.len(),
        }
    }
}

/// Start-to-end change over an ordered value series.
///
/// `pct_change` is 1.0 when growth starts from zero, 0.0 when both ends are
/// zero, otherwise the signed fraction of the starting value.
pub fn compute_changes(values: &[f64]) -> Option<ChangeSummary> {
    if values.len() < 2 {
        return None;
    }
    let start_value = values[0];
    let end_value = values[values.len() - 1];
    let abs_change = end_value - start_value;
    let pct_change = if start_value == 0.0 {
        if end_value == 0.0 {
            0.0
        } else {
            1.0
        }
    } else {
        abs_change / start_value
    };
    Some(ChangeSummary {
        start_value,
        end_value,
        abs_change,
        pct_change,
    })
}
