//! Askama filters used by the console templates.

use chrono::{NaiveDate, NaiveDateTime};

use crate::models::cents_to_price;

/// `12050` -> `120.50`
pub fn money(cents: &i64) -> askama::Result<String> {
    Ok(format!("{:.2}", cents_to_price(*cents)))
}

/// `2030-05-17T14:30:00` -> `Fri 17 May 2030, 14:30`
pub fn when(value: &NaiveDateTime) -> askama::Result<String> {
    Ok(value.format("%a %-d %b %Y, %H:%M").to_string())
}

/// `2030-05-17T14:30:00` -> `14:30`
pub fn clock(value: &NaiveDateTime) -> askama::Result<String> {
    Ok(value.format("%H:%M").to_string())
}

pub fn day(value: &NaiveDate) -> askama::Result<String> {
    Ok(value.format("%a %-d %b %Y").to_string())
}

/// Value for `<input type="datetime-local">`.
pub fn local_input(value: &NaiveDateTime) -> askama::Result<String> {
    Ok(value.format("%Y-%m-%dT%H:%M").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_money_and_times() {
        assert_eq!(money(&12050).expect("money"), "120.50");
        assert_eq!(money(&5).expect("money"), "0.05");

        let value = NaiveDate::from_ymd_opt(2030, 5, 17)
            .and_then(|date| date.and_hms_opt(14, 30, 0))
            .expect("time");
        assert_eq!(when(&value).expect("when"), "Fri 17 May 2030, 14:30");
        assert_eq!(local_input(&value).expect("input"), "2030-05-17T14:30");
        assert_eq!(clock(&value).expect("clock"), "14:30");
        assert_eq!(day(&value.date()).expect("day"), "Fri 17 May 2030");
    }
}
