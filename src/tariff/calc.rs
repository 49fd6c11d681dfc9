//! Pure wage-component arithmetic.
//!
//! Everything here is stateless: a validated request plus the table provider
//! in, a cent-rounded breakdown out. Trainee groups (`AJ*`) get no
//! performance bonus but may receive a child supplement; T-ZUG B is based on
//! `EG05.B` of the period's table rather than the employee's own group.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::TableProvider;

/// Divisor turning a monthly amount into a per-day rate for vacation pay.
const VACATION_DAY_DIVISOR: f64 = 65.25;
const VACATION_DAY_FACTOR: f64 = 1.5;
const HOLIDAY_PAY_PCT: f64 = 18.4;
const T_ZUG_A_PCT: f64 = 27.5;
const T_ZUG_B_PCT_UNTIL_2025: f64 = 18.5;
const T_ZUG_B_PCT_FROM_2026: f64 = 26.5;
/// Baseline weekly hours the table values are quoted at.
const BASE_WEEKLY_HOURS: f64 = 35.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TZugBPeriod {
    #[serde(rename = "until2025")]
    Until2025,
    #[serde(rename = "from2026")]
    From2026,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalcRequest {
    /// Table key, i.e. the file name without `.json` (e.g. `april2025`).
    pub tariff_date: String,
    /// Pay group: `EG01`..`EG99` or trainee years `AJ1`..`AJ4`.
    pub eg: String,
    /// Stufe within the group; only needed for staged groups and defaulted
    /// to the lowest stage when absent.
    #[serde(default)]
    pub stufe: Option<String>,
    /// Individual contractual weekly hours.
    pub irwaz_hours: f64,
    /// Performance bonus percentage.
    pub leistungs_pct: f64,
    /// Vacation days per year.
    pub urlaubstage: u32,
    /// Months of company tenure.
    pub betriebs_monate: u32,
    pub t_zug_b_period: TZugBPeriod,
    /// Trainee child supplement eligibility.
    #[serde(default)]
    pub eigene_kinder: bool,
}

impl CalcRequest {
    /// Range checks, reporting every violation at once.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.tariff_date.trim().is_empty() {
            errors.push("tariffDate must not be empty.".to_string());
        }
        if !is_valid_group(&self.eg) {
            errors.push("eg must match EG00-EG99 or AJ1-AJ4.".to_string());
        }
        if !(0.0..=40.0).contains(&self.irwaz_hours) {
            errors.push("irwazHours must be between 0 and 40.".to_string());
        }
        if !(0.0..=28.0).contains(&self.leistungs_pct) {
            errors.push("leistungsPct must be between 0 and 28.".to_string());
        }
        if self.urlaubstage > 36 {
            errors.push("urlaubstage must be between 0 and 36.".to_string());
        }
        if self.betriebs_monate > 480 {
            errors.push("betriebsMonate must be between 0 and 480.".to_string());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

#[derive(Debug, Error)]
pub enum CalcError {
    #[error("no table found for '{0}'")]
    UnknownTable(String),
    #[error("pay group '{eg}' does not exist in '{table}'")]
    UnknownGroup { eg: String, table: String },
    #[error("base value missing for {0}")]
    MissingBase(String),
    #[error("T-ZUG B base (EG05.B) missing in table '{0}'")]
    MissingTZugBBase(String),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VacationPay {
    pub entgelt_pro_tag: f64,
    pub tage: u32,
    pub gesamt: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakdown {
    /// Table value at 35 weekly hours, before IRWAZ scaling.
    pub grund35: f64,
    pub irwaz_hours: f64,
    pub grund: f64,
    /// Absent for trainees, who get no performance bonus.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bonus: Option<f64>,
    pub kinderzulage: f64,
    /// Tenure-staged 13th-month percentage.
    pub p13: u32,
    pub mon13: f64,
    pub t_geld: f64,
    pub t_zug_a: f64,
    pub t_zug_b: f64,
    pub urlaub: VacationPay,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub monat: f64,
    pub jahr: f64,
    pub durchschnitt_monat: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalcResult {
    pub breakdown: Breakdown,
    pub totals: Totals,
}

pub fn calculate(
    provider: &dyn TableProvider,
    request: &CalcRequest,
) -> Result<CalcResult, CalcError> {
    let table = provider
        .table(&request.tariff_date)
        .ok_or_else(|| CalcError::UnknownTable(request.tariff_date.clone()))?;

    let group = table
        .get(&request.eg)
        .or_else(|| table.get("EG01"))
        .ok_or_else(|| CalcError::UnknownGroup {
            eg: request.eg.clone(),
            table: request.tariff_date.clone(),
        })?;

    // Flat groups carry a single `salary` value; staged groups default to
    // their lowest stage when none was requested.
    let (base35, stufe) = if let Some(salary) = group.get("salary") {
        (*salary, None)
    } else {
        let stufe = request
            .stufe
            .clone()
            .or_else(|| group.keys().next().cloned())
            .ok_or_else(|| CalcError::MissingBase(request.eg.clone()))?;
        let value = group.get(&stufe).copied().ok_or_else(|| {
            CalcError::MissingBase(format!("{} / {}", request.eg, stufe))
        })?;
        (value, Some(stufe))
    };
    if !base35.is_finite() {
        let mut what = request.eg.clone();
        if let Some(stufe) = &stufe {
            let _ = write!(what, " / {stufe}");
        }
        return Err(CalcError::MissingBase(what));
    }

    let base = base35 * (request.irwaz_hours / BASE_WEEKLY_HOURS);
    let is_trainee = request.eg.starts_with("AJ");
    let bonus = if is_trainee {
        0.0
    } else {
        base * (request.leistungs_pct / 100.0)
    };
    let child_supplement = if is_trainee && request.eigene_kinder {
        base * 0.5
    } else {
        0.0
    };

    let p13: u32 = match request.betriebs_monate {
        months if months >= 36 => 55,
        months if months >= 24 => 45,
        months if months >= 12 => 35,
        months if months >= 6 => 25,
        _ => 0,
    };

    let month_base = base + bonus;
    let mon13 = month_base * (f64::from(p13) / 100.0);
    let holiday_pay = month_base * (HOLIDAY_PAY_PCT / 100.0);
    let t_zug_a = month_base * (T_ZUG_A_PCT / 100.0);

    // T-ZUG B draws on EG05.B of the period's table; from 2026 that is
    // always the april2026 table, regardless of the requested one.
    let (t_zug_b_key, t_zug_b_pct) = match request.t_zug_b_period {
        TZugBPeriod::From2026 => ("april2026".to_string(), T_ZUG_B_PCT_FROM_2026),
        TZugBPeriod::Until2025 => (request.tariff_date.clone(), T_ZUG_B_PCT_UNTIL_2025),
    };
    let eg05_b = provider
        .table(&t_zug_b_key)
        .and_then(|t| t.get("EG05"))
        .and_then(|g| g.get("B"))
        .copied()
        .filter(|v| v.is_finite())
        .ok_or_else(|| CalcError::MissingTZugBBase(t_zug_b_key))?;
    let t_zug_b = if is_trainee {
        base * (t_zug_b_pct / 100.0)
    } else {
        eg05_b * (t_zug_b_pct / 100.0)
    };

    let day_rate = if request.urlaubstage > 0 {
        month_base / VACATION_DAY_DIVISOR * VACATION_DAY_FACTOR
    } else {
        0.0
    };
    let vacation_total = day_rate * f64::from(request.urlaubstage);

    let monthly = month_base + child_supplement;
    let yearly = month_base * 12.0
        + child_supplement * 12.0
        + mon13
        + holiday_pay
        + t_zug_a
        + t_zug_b
        + vacation_total;

    Ok(CalcResult {
        breakdown: Breakdown {
            grund35: euro(base35),
            irwaz_hours: request.irwaz_hours,
            grund: euro(base),
            bonus: (!is_trainee).then(|| euro(bonus)),
            kinderzulage: euro(child_supplement),
            p13,
            mon13: euro(mon13),
            t_geld: euro(holiday_pay),
            t_zug_a: euro(t_zug_a),
            t_zug_b: euro(t_zug_b),
            urlaub: VacationPay {
                entgelt_pro_tag: euro(day_rate),
                tage: request.urlaubstage,
                gesamt: euro(vacation_total),
            },
        },
        totals: Totals {
            monat: euro(monthly),
            jahr: euro(yearly),
            durchschnitt_monat: euro(yearly / 12.0),
        },
    })
}

fn is_valid_group(eg: &str) -> bool {
    if let Some(digits) = eg.strip_prefix("EG") {
        digits.len() == 2 && digits.chars().all(|c| c.is_ascii_digit())
    } else if let Some(year) = eg.strip_prefix("AJ") {
        matches!(year, "1" | "2" | "3" | "4")
    } else {
        false
    }
}

/// Rounds to cents; non-finite intermediate values collapse to zero.
fn euro(value: f64) -> f64 {
    if value.is_finite() {
        (value * 100.0).round() / 100.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tariff::{FileTableProvider, TableEntry, TariffTable};
    use std::collections::BTreeMap;

    fn group(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    fn fixture_provider() -> FileTableProvider {
        let mut april2025: TariffTable = BTreeMap::new();
        april2025.insert("EG05".to_string(), group(&[("A", 2800.0), ("B", 3000.0), ("C", 3200.0)]));
        april2025.insert("EG09".to_string(), group(&[("A", 4000.0), ("B", 4200.0)]));
        april2025.insert("EG12".to_string(), group(&[("salary", 5500.0)]));
        april2025.insert("AJ1".to_string(), group(&[("salary", 1100.0)]));

        let mut april2026: TariffTable = BTreeMap::new();
        april2026.insert("EG05".to_string(), group(&[("B", 3150.0)]));

        let mut mai2024: TariffTable = BTreeMap::new();
        mai2024.insert("EG09".to_string(), group(&[("A", 3900.0)]));

        let mut entries = BTreeMap::new();
        for (key, table) in [
            ("april2025", april2025),
            ("april2026", april2026),
            ("mai2024", mai2024),
        ] {
            entries.insert(
                key.to_string(),
                TableEntry {
                    table,
                    at_min: serde_json::Map::new(),
                },
            );
        }
        FileTableProvider::from_entries(entries, vec![])
    }

    fn base_request() -> CalcRequest {
        CalcRequest {
            tariff_date: "april2025".to_string(),
            eg: "EG09".to_string(),
            stufe: Some("B".to_string()),
            irwaz_hours: 35.0,
            leistungs_pct: 10.0,
            urlaubstage: 30,
            betriebs_monate: 40,
            t_zug_b_period: TZugBPeriod::Until2025,
            eigene_kinder: false,
        }
    }

    #[test]
    fn test_full_breakdown_for_staged_group() {
        let provider = fixture_provider();
        let result = calculate(&provider, &base_request()).unwrap();

        let b = &result.breakdown;
        assert_eq!(b.grund35, 4200.0);
        assert_eq!(b.grund, 4200.0);
        assert_eq!(b.bonus, Some(420.0));
        assert_eq!(b.kinderzulage, 0.0);
        assert_eq!(b.p13, 55);
        assert_eq!(b.mon13, 2541.0);
        assert_eq!(b.t_geld, 850.08);
        assert_eq!(b.t_zug_a, 1270.5);
        // EG05.B of april2025 is 3000 -> 18.5%.
        assert_eq!(b.t_zug_b, 555.0);
        assert_eq!(b.urlaub.entgelt_pro_tag, 106.21);
        assert_eq!(b.urlaub.gesamt, 3186.21);

        assert_eq!(result.totals.monat, 4620.0);
        assert_eq!(result.totals.jahr, 63842.79);
        assert_eq!(result.totals.durchschnitt_monat, 5320.23);
    }

    #[test]
    fn test_irwaz_scaling_and_flat_salary_group() {
        let provider = fixture_provider();
        let mut request = base_request();
        request.eg = "EG12".to_string();
        request.stufe = None;
        request.irwaz_hours = 28.0;

        let result = calculate(&provider, &request).unwrap();
        assert_eq!(result.breakdown.grund35, 5500.0);
        assert_eq!(result.breakdown.grund, 4400.0);
    }

    #[test]
    fn test_stufe_defaults_to_lowest_stage() {
        let provider = fixture_provider();
        let mut request = base_request();
        request.eg = "EG05".to_string();
        request.stufe = None;

        let result = calculate(&provider, &request).unwrap();
        assert_eq!(result.breakdown.grund35, 2800.0);
    }

    #[test]
    fn test_trainee_gets_supplement_but_no_bonus() {
        let provider = fixture_provider();
        let request = CalcRequest {
            tariff_date: "april2025".to_string(),
            eg: "AJ1".to_string(),
            stufe: None,
            irwaz_hours: 35.0,
            leistungs_pct: 20.0,
            urlaubstage: 0,
            betriebs_monate: 0,
            t_zug_b_period: TZugBPeriod::From2026,
            eigene_kinder: true,
        };

        let result = calculate(&provider, &request).unwrap();
        let b = &result.breakdown;
        assert_eq!(b.bonus, None);
        assert_eq!(b.kinderzulage, 550.0);
        assert_eq!(b.p13, 0);
        assert_eq!(b.t_geld, 202.4);
        assert_eq!(b.t_zug_a, 302.5);
        // Trainees use their own base for T-ZUG B: 1100 * 26.5%.
        assert_eq!(b.t_zug_b, 291.5);
        assert_eq!(b.urlaub.gesamt, 0.0);

        assert_eq!(result.totals.monat, 1650.0);
        assert_eq!(result.totals.jahr, 20596.4);
        assert_eq!(result.totals.durchschnitt_monat, 1716.37);
    }

    #[test]
    fn test_tenure_percentage_tiers() {
        let provider = fixture_provider();
        for (months, expected) in [(0, 0), (5, 0), (6, 25), (12, 35), (24, 45), (35, 45), (36, 55), (480, 55)] {
            let mut request = base_request();
            request.betriebs_monate = months;
            let result = calculate(&provider, &request).unwrap();
            assert_eq!(result.breakdown.p13, expected, "months = {months}");
        }
    }

    #[test]
    fn test_missing_t_zug_b_base_is_an_error() {
        let provider = fixture_provider();
        let mut request = base_request();
        // mai2024 has no EG05 at all.
        request.tariff_date = "mai2024".to_string();
        request.eg = "EG09".to_string();
        request.stufe = Some("A".to_string());

        let err = calculate(&provider, &request).unwrap_err();
        assert!(matches!(err, CalcError::MissingTZugBBase(key) if key == "mai2024"));
    }

    #[test]
    fn test_unknown_table_and_group() {
        let provider = fixture_provider();
        let mut request = base_request();
        request.tariff_date = "never".to_string();
        assert!(matches!(
            calculate(&provider, &request).unwrap_err(),
            CalcError::UnknownTable(_)
        ));

        let mut request = base_request();
        request.eg = "EG77".to_string();
        // No EG77 and no EG01 fallback in the fixture.
        assert!(matches!(
            calculate(&provider, &request).unwrap_err(),
            CalcError::UnknownGroup { .. }
        ));
    }

    #[test]
    fn test_validation_collects_all_range_errors() {
        let request = CalcRequest {
            tariff_date: String::new(),
            eg: "EG5".to_string(),
            stufe: None,
            irwaz_hours: 50.0,
            leistungs_pct: 30.0,
            urlaubstage: 40,
            betriebs_monate: 500,
            t_zug_b_period: TZugBPeriod::Until2025,
            eigene_kinder: false,
        };
        let errors = request.validate().unwrap_err();
        assert_eq!(errors.len(), 6);
    }

    #[test]
    fn test_group_pattern() {
        assert!(is_valid_group("EG01"));
        assert!(is_valid_group("EG14"));
        assert!(is_valid_group("AJ4"));
        assert!(!is_valid_group("EG1"));
        assert!(!is_valid_group("EG123"));
        assert!(!is_valid_group("AJ5"));
        assert!(!is_valid_group("eg01"));
    }
}
