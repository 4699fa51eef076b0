use anyhow::Result;

use crate::layers::GoldRow;

pub fn gold_to_csv(rows: &[GoldRow]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record([
        "base_currency",
        "currency",
        "rate",
        "daily_change_pct",
        "timestamp",
    ])?;
    for row in rows {
        writer.write_record([
            row.base_currency.clone(),
            row.currency.clone(),
            format!("{:.6}", row.rate),
            format!("{:.4}", row.daily_change_pct),
            row.timestamp.to_rfc3339(),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}
