use chrono::NaiveDate;
use regex::{Regex, RegexBuilder};

use crate::error::{FakturoError, Result};
use crate::models::{clamp_confidence, FieldMap, FieldValue};

pub const INVOICE_NUMBER: &str = "invoice_number";
pub const ISSUE_DATE: &str = "issue_date";
pub const SALE_DATE: &str = "sale_date";
pub const DUE_DATE: &str = "due_date";
pub const SELLER_TAX_ID: &str = "seller_tax_id";
pub const BUYER_TAX_ID: &str = "buyer_tax_id";
pub const NET_TOTAL: &str = "net_total";
pub const VAT_TOTAL: &str = "vat_total";
pub const GROSS_TOTAL: &str = "gross_total";
pub const CURRENCY: &str = "currency";

/// Confidence for a value found next to an explicit label and normalised cleanly.
const LABELLED: f64 = 0.9;
/// Confidence for a value picked up by a looser fallback pattern.
const FALLBACK: f64 = 0.65;
/// Confidence for a labelled value that could not be normalised.
const UNPARSED: f64 = 0.35;

const DATE: &str = r"(\d{4}-\d{2}-\d{2}|\d{1,2}[./-]\d{1,2}[./-]\d{4})";
const AMOUNT: &str = r"(\d{1,3}(?:[  .]\d{3})*(?:[.,]\d{2})|\d+(?:[.,]\d{2})?)";

/// Regex heuristics that turn plain OCR text into invoice fields.
///
/// Patterns cover the Polish and English labels commonly printed on invoices.
/// Every hit gets a heuristic confidence which callers scale by the engine's
/// own recognition confidence.
pub struct InvoiceFieldParser {
    invoice_number: Regex,
    issue_date: Regex,
    sale_date: Regex,
    due_date: Regex,
    tax_id: Regex,
    net_total: Regex,
    vat_total: Regex,
    gross_total: Regex,
    gross_fallback: Regex,
    currency: Regex,
}

fn compile(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .multi_line(true)
        .build()
        .map_err(|e| FakturoError::Configuration(format!("Invalid field pattern: {e}")))
}

fn labelled_date(labels: &str) -> Result<Regex> {
    compile(&format!(r"(?:{labels})\s*[:\-]?\s*{DATE}"))
}

fn labelled_amount(labels: &str) -> Result<Regex> {
    compile(&format!(r"(?:{labels})\s*[:\-]?\s*(?:PLN|EUR|USD|z[łl])?\s*{AMOUNT}"))
}

impl InvoiceFieldParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            invoice_number: compile(
                r"(?:faktura(?:\s+vat)?(?:\s+(?:nr|numer))?|invoice\s*(?:no\.?|number|nr|#))\s*[:#.]?\s*([A-Z0-9][A-Z0-9/\-_.]{1,39})",
            )?,
            issue_date: labelled_date(
                r"data\s+wystawienia|issue\s+date|date\s+of\s+issue|invoice\s+date",
            )?,
            sale_date: labelled_date(
                r"data\s+sprzeda[żz]y|data\s+dostawy|sale\s+date|date\s+of\s+(?:sale|supply)",
            )?,
            due_date: labelled_date(r"termin\s+p[łl]atno[śs]ci|due\s+date|payment\s+due")?,
            tax_id: compile(
                r"(?:NIP|VAT\s*(?:ID|No\.?)|Tax\s*ID)\s*[:\-]?\s*((?:PL\s*)?\d{3}[- ]?\d{2,3}[- ]?\d{2}[- ]?\d{2,3})",
            )?,
            net_total: labelled_amount(r"razem\s+netto|warto[śs][ćc]\s+netto|net\s+(?:total|amount)|subtotal")?,
            vat_total: labelled_amount(r"kwota\s+vat|razem\s+vat|vat\s+(?:total|amount)|tax\s+amount")?,
            gross_total: labelled_amount(
                r"do\s+zap[łl]aty|razem\s+brutto|warto[śs][ćc]\s+brutto|gross\s+total|total\s+due|amount\s+due|grand\s+total",
            )?,
            gross_fallback: labelled_amount(r"^\s*total")?,
            currency: compile(r"\b(PLN|EUR|USD|GBP|CHF|CZK)\b|\b(z[łl])\b")?,
        })
    }

    pub fn parse(&self, text: &str) -> FieldMap {
        let mut fields = FieldMap::new();

        if let Some(caps) = self.invoice_number.captures(text) {
            let number = caps[1].trim_end_matches(['.', '-', '/']).to_string();
            fields.insert(INVOICE_NUMBER.to_string(), FieldValue::new(number, LABELLED));
        }

        for (name, pattern) in [
            (ISSUE_DATE, &self.issue_date),
            (SALE_DATE, &self.sale_date),
            (DUE_DATE, &self.due_date),
        ] {
            if let Some(caps) = pattern.captures(text) {
                let raw = &caps[1];
                let field = match normalize_date(raw) {
                    Some(date) => FieldValue::new(date, LABELLED),
                    None => FieldValue::new(raw, UNPARSED),
                };
                fields.insert(name.to_string(), field);
            }
        }

        let mut tax_ids = self
            .tax_id
            .captures_iter(text)
            .map(|caps| normalize_tax_id(&caps[1]));
        if let Some(seller) = tax_ids.next() {
            fields.insert(SELLER_TAX_ID.to_string(), FieldValue::new(seller, LABELLED));
        }
        if let Some(buyer) = tax_ids.next() {
            fields.insert(BUYER_TAX_ID.to_string(), FieldValue::new(buyer, FALLBACK));
        }

        for (name, pattern) in [(NET_TOTAL, &self.net_total), (VAT_TOTAL, &self.vat_total)] {
            if let Some(field) = amount_field(pattern, text, LABELLED) {
                fields.insert(name.to_string(), field);
            }
        }

        let gross = amount_field(&self.gross_total, text, LABELLED)
            .or_else(|| amount_field(&self.gross_fallback, text, FALLBACK));
        if let Some(field) = gross {
            fields.insert(GROSS_TOTAL.to_string(), field);
        }

        if let Some(caps) = self.currency.captures(text) {
            let code = match caps.get(1) {
                Some(code) => code.as_str().to_uppercase(),
                None => "PLN".to_string(),
            };
            fields.insert(CURRENCY.to_string(), FieldValue::new(code, FALLBACK));
        }

        fields
    }

    /// Parse and scale each field by the engine's recognition confidence.
    pub fn parse_scaled(&self, text: &str, recognition_confidence: f64) -> FieldMap {
        let scale = clamp_confidence(recognition_confidence);
        self.parse(text)
            .into_iter()
            .map(|(name, field)| {
                let confidence = field.confidence * scale;
                (name, FieldValue::new(field.value, confidence))
            })
            .collect()
    }
}

fn amount_field(pattern: &Regex, text: &str, confidence: f64) -> Option<FieldValue> {
    let caps = pattern.captures(text)?;
    let raw = &caps[1];
    Some(match normalize_amount(raw) {
        Some(amount) => FieldValue::new(amount, confidence),
        None => FieldValue::new(raw, UNPARSED),
    })
}

/// ISO `YYYY-MM-DD` from either ISO or day-first input.
pub fn normalize_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let parsed = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().or_else(|| {
        let unified = raw.replace(['/', '-'], ".");
        NaiveDate::parse_from_str(&unified, "%d.%m.%Y").ok()
    })?;
    Some(parsed.format("%Y-%m-%d").to_string())
}

/// Two-decimal amount from `1 234,56`, `1.234,56`, `1,234.56` style input.
pub fn normalize_amount(raw: &str) -> Option<String> {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .collect();

    let decimal_pos = compact.rfind([',', '.']).filter(|&i| compact.len() - i == 3);
    let normalized: String = compact
        .char_indices()
        .filter_map(|(i, c)| match c {
            ',' | '.' if Some(i) == decimal_pos => Some('.'),
            ',' | '.' => None,
            _ => Some(c),
        })
        .collect();

    let value: f64 = normalized.parse().ok()?;
    Some(format!("{value:.2}"))
}

fn normalize_tax_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_uppercase()
}
