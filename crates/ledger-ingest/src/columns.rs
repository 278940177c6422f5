//! Column semantics: a declarative priority table resolved by one function.
//!
//! Each rule lists primary matchers and fallback matchers for a field. The
//! columns are scanned left to right with every primary matcher before any
//! fallback is tried, and the first hit binds the field. One column may bind
//! several fields (a "VB Code" column is both the code and, when no
//! "Recruiter Name" exists, the recruiter identity).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use ledger_core::CellValue;
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;

use crate::header::normalize_row;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SheetField {
    CandidateName,
    RecruiterName,
    VbCode,
    LeadName,
    ClientName,
    JoinDate,
    QuitDate,
    InvoiceDate,
    DaysCompleted,
    TotalRevenue,
    Revenue,
    RevenueAsLead,
    BillingStatus,
    PlacementType,
    IncentiveAmountInr,
    IncentivePaid,
    Qualifier,
    YearlyPlacementTarget,
    YearlyRevenueTarget,
    PlacementsAchieved,
    RevenueAchieved,
    PlacementAchievementPct,
    RevenueAchievementPct,
    SlabQualified,
    TotalIncentiveInr,
    TotalIncentivePaidInr,
}

/// Predicate over one normalized header token. All non-empty clauses must hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Matcher {
    pub equals: Option<String>,
    pub all_of: Vec<String>,
    pub any_of: Vec<String>,
    pub none_of: Vec<String>,
}

impl Matcher {
    pub fn contains(needles: &[&str]) -> Self {
        Self {
            all_of: needles.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn exact(token: &str) -> Self {
        Self {
            equals: Some(token.to_string()),
            ..Default::default()
        }
    }

    pub fn or_any(mut self, needles: &[&str]) -> Self {
        self.any_of = needles.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn excluding(mut self, needles: &[&str]) -> Self {
        self.none_of = needles.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn matches(&self, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        if self.equals.is_none() && self.all_of.is_empty() && self.any_of.is_empty() {
            return false;
        }
        if let Some(expected) = &self.equals {
            if token != expected {
                return false;
            }
        }
        self.all_of.iter().all(|n| token.contains(n.as_str()))
            && (self.any_of.is_empty() || self.any_of.iter().any(|n| token.contains(n.as_str())))
            && !self.none_of.iter().any(|n| token.contains(n.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRule {
    pub field: SheetField,
    pub primary: Vec<Matcher>,
    #[serde(default)]
    pub fallback: Vec<Matcher>,
}

impl ColumnRule {
    fn new(field: SheetField, primary: Vec<Matcher>, fallback: Vec<Matcher>) -> Self {
        Self {
            field,
            primary,
            fallback,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRules {
    pub rules: Vec<ColumnRule>,
}

impl Default for ColumnRules {
    fn default() -> Self {
        use SheetField::*;
        let c = Matcher::contains;
        Self {
            rules: vec![
                ColumnRule::new(CandidateName, vec![c(&["candidate name"])], vec![c(&["candidate"])]),
                ColumnRule::new(RecruiterName, vec![c(&["recruiter name"])], vec![c(&["vb code"])]),
                ColumnRule::new(
                    VbCode,
                    vec![c(&["vb code"])],
                    vec![c(&["employee id"]), c(&["emp code"])],
                ),
                ColumnRule::new(
                    LeadName,
                    vec![c(&["lead name"]), c(&["l2 name"])],
                    vec![Matcher::exact("lead"), Matcher::exact("l2")],
                ),
                ColumnRule::new(
                    ClientName,
                    vec![c(&["client", "name"]), Matcher::exact("client")],
                    vec![c(&["client"])],
                ),
                ColumnRule::new(
                    JoinDate,
                    vec![Matcher::exact("doj"), c(&["date of joining"]), c(&["join", "date"])],
                    vec![c(&["doj"]), c(&["joining"])],
                ),
                ColumnRule::new(
                    QuitDate,
                    vec![Matcher::exact("doq"), c(&["quit", "date"]), c(&["date of quitting"])],
                    vec![c(&["doq"]), c(&["quit"]), c(&["exit date"])],
                ),
                ColumnRule::new(
                    InvoiceDate,
                    vec![c(&["invoice", "date"])],
                    vec![c(&["invoice"]).excluding(&["status", "number", "amount"])],
                ),
                ColumnRule::new(
                    DaysCompleted,
                    vec![c(&["days completed"])],
                    vec![c(&["days"]).excluding(&["target"])],
                ),
                ColumnRule::new(TotalRevenue, vec![c(&["total revenue"])], vec![]),
                ColumnRule::new(
                    Revenue,
                    vec![c(&["revenue"]).excluding(&[
                        "target",
                        "qualifier",
                        "total",
                        "lead",
                        "achieved",
                        "achievement",
                    ])],
                    vec![c(&["revenue"]).excluding(&[
                        "target",
                        "qualifier",
                        "total",
                        "achieved",
                        "achievement",
                    ])],
                ),
                ColumnRule::new(
                    RevenueAsLead,
                    vec![c(&["revenue", "lead"]).excluding(&["target", "qualifier", "total"])],
                    vec![],
                ),
                ColumnRule::new(
                    BillingStatus,
                    vec![c(&["billing status"])],
                    vec![c(&["billing"]), c(&["invoice status"])],
                ),
                ColumnRule::new(
                    PlacementType,
                    vec![c(&["placement type"])],
                    vec![Matcher::exact("type")],
                ),
                ColumnRule::new(
                    IncentiveAmountInr,
                    vec![c(&["incentive"])
                        .or_any(&["amount", "inr"])
                        .excluding(&["total", "paid"])],
                    vec![c(&["incentive amount"])],
                ),
                ColumnRule::new(
                    IncentivePaid,
                    vec![c(&["incentive paid"]).excluding(&["total"])],
                    vec![],
                ),
                ColumnRule::new(
                    Qualifier,
                    vec![Matcher::exact("qualifier")],
                    vec![c(&["qualifier"]).excluding(&["slab", "revenue", "target"])],
                ),
                ColumnRule::new(
                    YearlyPlacementTarget,
                    vec![c(&["placement", "target"]).excluding(&["achieved", "achievement"])],
                    vec![],
                ),
                ColumnRule::new(
                    YearlyRevenueTarget,
                    vec![c(&["revenue", "target"]).excluding(&["achieved", "achievement"])],
                    vec![],
                ),
                ColumnRule::new(
                    PlacementsAchieved,
                    vec![c(&["placement", "done"]), c(&["placements", "achieved"]).excluding(&["target"])],
                    vec![c(&["placement", "achieved"]).excluding(&["target"])],
                ),
                ColumnRule::new(
                    RevenueAchieved,
                    vec![c(&["revenue", "achieved"]).excluding(&["target"])],
                    vec![],
                ),
                ColumnRule::new(
                    PlacementAchievementPct,
                    vec![c(&["placement", "target", "achieved"]), c(&["placement", "achievement"])],
                    vec![],
                ),
                ColumnRule::new(
                    RevenueAchievementPct,
                    vec![c(&["revenue", "target", "achieved"]), c(&["revenue", "achievement"])],
                    vec![],
                ),
                ColumnRule::new(SlabQualified, vec![c(&["slab"])], vec![c(&["qualifier"])]),
                ColumnRule::new(
                    TotalIncentiveInr,
                    vec![c(&["total incentive"]).excluding(&["paid"])],
                    vec![],
                ),
                ColumnRule::new(
                    TotalIncentivePaidInr,
                    vec![c(&["total incentive", "paid"])],
                    vec![],
                ),
            ],
        }
    }
}

impl ColumnRules {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing column rules")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Resolved field → column index for one header declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct HeaderMap {
    columns: BTreeMap<SheetField, usize>,
}

impl HeaderMap {
    pub fn get(&self, field: SheetField) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    pub fn contains(&self, field: SheetField) -> bool {
        self.columns.contains_key(&field)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SheetField, usize)> + '_ {
        self.columns.iter().map(|(f, c)| (*f, *c))
    }
}

fn find_column(tokens: &[String], matchers: &[Matcher]) -> Option<usize> {
    tokens
        .iter()
        .position(|token| matchers.iter().any(|m| m.matches(token)))
}

/// Resolve normalized header tokens against the rule table.
pub fn map_columns(tokens: &[String], rules: &ColumnRules) -> HeaderMap {
    let mut map = HeaderMap::default();
    for rule in &rules.rules {
        if map.contains(rule.field) {
            continue;
        }
        if let Some(idx) =
            find_column(tokens, &rule.primary).or_else(|| find_column(tokens, &rule.fallback))
        {
            map.columns.insert(rule.field, idx);
        }
    }
    map
}

pub fn map_header_row(row: &[CellValue], rules: &ColumnRules) -> HeaderMap {
    map_columns(&normalize_row(row), rules)
}

/// Header token most similar to `expected`, for diagnostics on unusable headers.
pub fn closest_token<'a>(tokens: &'a [String], expected: &str) -> Option<(&'a str, f64)> {
    tokens
        .iter()
        .filter(|t| !t.is_empty())
        .map(|t| (t.as_str(), jaro_winkler(t, expected)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::normalize_header;

    fn tokens(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| normalize_header(c)).collect()
    }

    #[test]
    fn total_revenue_and_revenue_never_swap() {
        let rules = ColumnRules::default();
        let map = map_columns(&tokens(&["Total Revenue (USD)", "Revenue (USD)"]), &rules);
        assert_eq!(map.get(SheetField::TotalRevenue), Some(0));
        assert_eq!(map.get(SheetField::Revenue), Some(1));

        let map = map_columns(&tokens(&["Revenue (USD)", "Total Revenue (USD)"]), &rules);
        assert_eq!(map.get(SheetField::TotalRevenue), Some(1));
        assert_eq!(map.get(SheetField::Revenue), Some(0));
    }

    #[test]
    fn lead_revenue_binds_lead_field_and_backs_up_generic_revenue() {
        let rules = ColumnRules::default();
        let map = map_columns(&tokens(&["Candidate Name", "Revenue as Lead (USD)"]), &rules);
        assert_eq!(map.get(SheetField::RevenueAsLead), Some(1));
        assert_eq!(map.get(SheetField::Revenue), Some(1));

        let map = map_columns(
            &tokens(&["Candidate Name", "Revenue as Lead", "Revenue"]),
            &rules,
        );
        assert_eq!(map.get(SheetField::RevenueAsLead), Some(1));
        assert_eq!(map.get(SheetField::Revenue), Some(2));
    }

    #[test]
    fn targets_and_qualifiers_are_not_revenue() {
        let rules = ColumnRules::default();
        let map = map_columns(
            &tokens(&["Yearly Revenue Target", "Qualifier Revenue", "Candidate"]),
            &rules,
        );
        assert_eq!(map.get(SheetField::Revenue), None);
        assert_eq!(map.get(SheetField::YearlyRevenueTarget), Some(0));
        assert_eq!(map.get(SheetField::CandidateName), Some(2));
    }

    #[test]
    fn recruiter_falls_back_to_vb_code() {
        let rules = ColumnRules::default();
        let map = map_columns(&tokens(&["VB Code", "Candidate Name"]), &rules);
        assert_eq!(map.get(SheetField::RecruiterName), Some(0));
        assert_eq!(map.get(SheetField::VbCode), Some(0));

        let map = map_columns(&tokens(&["VB Code", "Recruiter Name", "Candidate Name"]), &rules);
        assert_eq!(map.get(SheetField::RecruiterName), Some(1));
        assert_eq!(map.get(SheetField::VbCode), Some(0));
    }

    #[test]
    fn client_prefers_named_column() {
        let rules = ColumnRules::default();
        let map = map_columns(&tokens(&["Client Location", "Client Name"]), &rules);
        assert_eq!(map.get(SheetField::ClientName), Some(1));
        let map = map_columns(&tokens(&["Client Location"]), &rules);
        assert_eq!(map.get(SheetField::ClientName), Some(0));
    }

    #[test]
    fn first_matching_column_wins_for_duplicates() {
        let rules = ColumnRules::default();
        let map = map_columns(&tokens(&["Candidate Name", "Candidate Name"]), &rules);
        assert_eq!(map.get(SheetField::CandidateName), Some(0));
    }

    #[test]
    fn incentive_vocabulary_is_disambiguated() {
        let rules = ColumnRules::default();
        let map = map_columns(
            &tokens(&[
                "Total Incentive in INR",
                "Total Incentive Paid INR",
                "Incentive Amount (INR)",
                "Incentive Paid",
                "Slab Qualified",
            ]),
            &rules,
        );
        assert_eq!(map.get(SheetField::TotalIncentiveInr), Some(0));
        assert_eq!(map.get(SheetField::TotalIncentivePaidInr), Some(1));
        assert_eq!(map.get(SheetField::IncentiveAmountInr), Some(2));
        assert_eq!(map.get(SheetField::IncentivePaid), Some(3));
        assert_eq!(map.get(SheetField::SlabQualified), Some(4));
    }

    #[test]
    fn administrative_columns_stay_unmapped() {
        let rules = ColumnRules::default();
        let map = map_columns(&tokens(&["S No", "Remarks", ""]), &rules);
        assert!(map.is_empty());
    }

    #[test]
    fn rules_round_trip_through_yaml() {
        let yaml = r#"
rules:
  - field: candidateName
    primary:
      - all_of: ["applicant"]
  - field: recruiterName
    primary:
      - equals: "owner"
"#;
        let rules = ColumnRules::from_yaml_str(yaml).unwrap();
        let map = map_columns(&tokens(&["Owner", "Applicant Full Name"]), &rules);
        assert_eq!(map.get(SheetField::CandidateName), Some(1));
        assert_eq!(map.get(SheetField::RecruiterName), Some(0));
    }

    #[test]
    fn slab_column_beats_an_earlier_qualifier_column() {
        let rules = ColumnRules::default();
        let map = map_columns(&tokens(&["Qualifier", "Slab"]), &rules);
        assert_eq!(map.get(SheetField::SlabQualified), Some(1));
        assert_eq!(map.get(SheetField::Qualifier), Some(0));
        let map = map_columns(&tokens(&["Candidate", "Qualifier"]), &rules);
        assert_eq!(map.get(SheetField::SlabQualified), Some(1));
    }

    #[test]
    fn closest_token_reports_best_guess() {
        let toks = tokens(&["Client", "Candidat Nm"]);
        let found = closest_token(&toks, "candidate name").unwrap();
        assert_eq!(found.0, "candidat nm");
    }
}
