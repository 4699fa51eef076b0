use std::cmp::Ordering;

use chrono::NaiveDate;

use crate::layers::{format_date, GoldRow};

pub const SYSTEM_PROMPT: &str = "You are a senior financial analyst specialised in foreign exchange.";

/// Rows ordered by daily change, largest gain first; ties by currency code.
pub fn rank_movers(rows: &[GoldRow], top_n: usize) -> Vec<GoldRow> {
    let mut ranked = rows.to_vec();
    ranked.sort_by(|a, b| {
        b.daily_change_pct
            .partial_cmp(&a.daily_change_pct)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.currency.cmp(&b.currency))
    });
    ranked.truncate(top_n);
    ranked
}

pub fn render_markdown_table(rows: &[GoldRow]) -> String {
    let mut lines = vec![
        "currency | rate | daily_change_pct".to_string(),
        "--- | --- | ---".to_string(),
    ];
    for row in rows {
        lines.push(format!(
            "{} | {:.6} | {:.3}",
            row.currency, row.rate, row.daily_change_pct
        ));
    }
    lines.join("\n")
}

pub fn build_prompt(movers: &[GoldRow], date: NaiveDate, base_currency: &str, top_n: usize) -> String {
    format!(
        "Given the context below, write a short executive summary for a business audience \
(CFO / finance manager). Include: 1) the overall trend (which currencies appreciated or \
depreciated against {base_currency}), 2) three risks or observations, 3) three items to \
monitor, and 4) a technical note for analysts of at most three lines.\n\n\
Context: file date = {date}\n\n\
Top {top_n} currencies vs {base_currency} by daily change (%):\n{table}\n\n\
A daily change of exactly 0.000 may mean no prior-day rate was available.\n\
Be direct, use plain language and bullets where helpful.",
        date = format_date(date),
        table = render_markdown_table(movers),
    )
}
