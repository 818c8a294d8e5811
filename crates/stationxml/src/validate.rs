//! Business-rule validation of parsed StationXML documents. The checks run
//! in document order and stop at the first violated rule.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use models::NetworkKey;
use std::sync::OnceLock;
use xmltree::{Element, XMLNode};

use crate::error::ValidationError;

pub const SUPPORTED_SCHEMA_VERSION: &str = "1.0";

/// FIR numerator coefficients must sum to unity within this tolerance.
const FIR_SUM_TOLERANCE: f64 = 0.02;
/// Relative tolerance between declared instrument sensitivity and the
/// product of per-stage gains.
const GAIN_TOLERANCE: f64 = 0.001;

fn network_code_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new("^[A-Za-z0-9]{1,2}$").unwrap())
}

fn station_code_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new("^[A-Za-z0-9]{1,5}$").unwrap())
}

pub fn child_elements<'a>(
    el: &'a Element,
    name: &'a str,
) -> impl Iterator<Item = &'a Element> + 'a {
    el.children.iter().filter_map(move |node| match node {
        XMLNode::Element(child) if child.name == name => Some(child),
        _ => None,
    })
}

fn text_of(el: &Element) -> String {
    el.children
        .iter()
        .filter_map(|node| match node {
            XMLNode::Text(text) | XMLNode::CData(text) => Some(text.as_str()),
            _ => None,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

pub fn child_text(el: &Element, name: &str) -> Option<String> {
    child_elements(el, name)
        .next()
        .map(text_of)
        .filter(|text| !text.is_empty())
}

/// StationXML timestamps appear with and without sub-seconds and zone
/// designators; all are interpreted as UTC.
pub fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(t.and_utc());
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(d.and_hms_opt(0, 0, 0).unwrap().and_utc());
    }
    None
}

/// Parse document bytes and check the root element and declared schema
/// version. Well-formedness or shape failures surface as `SchemaInvalid`.
pub fn parse_root(bytes: &[u8]) -> Result<Element, ValidationError> {
    let root = Element::parse(bytes)
        .map_err(|err| ValidationError::SchemaInvalid(err.to_string()))?;
    if root.name != "FDSNStationXML" {
        return Err(ValidationError::SchemaInvalid(format!(
            "unexpected root element {:?}",
            root.name
        )));
    }
    match root.attributes.get("schemaVersion") {
        Some(version) if version == SUPPORTED_SCHEMA_VERSION => Ok(root),
        Some(version) => Err(ValidationError::UnsupportedSchemaVersion(version.clone())),
        None => Err(ValidationError::SchemaInvalid(
            "missing schemaVersion attribute".to_string(),
        )),
    }
}

/// Header-level attributes of a `Network` element.
#[derive(Debug, Clone)]
pub struct NetworkHeader {
    pub network: NetworkKey,
    pub restricted: bool,
    pub description: Option<String>,
}

pub fn network_header_of(el: &Element) -> Result<NetworkHeader, ValidationError> {
    let code = el
        .attributes
        .get("code")
        .cloned()
        .unwrap_or_default();
    if !network_code_re().is_match(&code) {
        return Err(ValidationError::BadNetworkCode(code));
    }
    let start = el
        .attributes
        .get("startDate")
        .and_then(|raw| parse_time(raw))
        .ok_or_else(|| {
            ValidationError::SchemaInvalid(format!("network {code} missing or invalid startDate"))
        })?;
    let end = match el.attributes.get("endDate") {
        Some(raw) => Some(parse_time(raw).ok_or_else(|| {
            ValidationError::SchemaInvalid(format!("network {code} has invalid endDate"))
        })?),
        None => None,
    };
    let restricted = el
        .attributes
        .get("restrictedStatus")
        .map(|status| status == "closed")
        .unwrap_or(false);

    Ok(NetworkHeader {
        network: NetworkKey { code, start, end },
        restricted,
        description: child_text(el, "Description"),
    })
}

pub fn station_code_of(el: &Element) -> Result<String, ValidationError> {
    let code = el.attributes.get("code").cloned().unwrap_or_default();
    if !station_code_re().is_match(&code) {
        return Err(ValidationError::BadStationCode(code));
    }
    Ok(code)
}

/// Validate every channel of one station. `label` is the `NET.STA` prefix
/// used in failure messages.
pub fn validate_station(label: &str, station: &Element) -> Result<(), ValidationError> {
    let channels: Vec<&Element> = child_elements(station, "Channel").collect();
    if channels.is_empty() {
        return Err(ValidationError::NoChannels(label.to_string()));
    }

    for channel in channels {
        let code = channel.attributes.get("code").cloned().unwrap_or_default();
        // LOG channels carry console output, not samples; they are exempt
        // from response checks.
        if code == "LOG" {
            continue;
        }
        let chan_label = format!("{label}.{code}");
        validate_channel(&chan_label, channel)?;
    }
    Ok(())
}

fn validate_channel(label: &str, channel: &Element) -> Result<(), ValidationError> {
    let sample_rate = child_text(channel, "SampleRate")
        .and_then(|raw| raw.parse::<f64>().ok())
        .ok_or_else(|| ValidationError::BadSampleRate(label.to_string()))?;
    if !sample_rate.is_finite() || sample_rate == 0.0 {
        return Err(ValidationError::BadSampleRate(label.to_string()));
    }

    let responses: Vec<&Element> = child_elements(channel, "Response").collect();
    let response = match responses.as_slice() {
        [] => return Err(ValidationError::MissingResponse(label.to_string())),
        [response] => *response,
        _ => return Err(ValidationError::DuplicateResponse(label.to_string())),
    };

    let stages: Vec<&Element> = child_elements(response, "Stage").collect();
    if stages.is_empty() {
        return Err(ValidationError::NoStages(label.to_string()));
    }

    let mut gain_product = 1.0f64;
    for stage in &stages {
        if let Some(fir) = child_elements(stage, "FIR").next() {
            validate_fir(label, fir)?;
        }
        if let Some(gain) = child_elements(stage, "StageGain")
            .next()
            .and_then(|g| child_text(g, "Value"))
            .and_then(|raw| raw.parse::<f64>().ok())
        {
            gain_product *= gain;
        }
    }

    let sensitivity = child_elements(response, "InstrumentSensitivity")
        .next()
        .and_then(|s| child_text(s, "Value"))
        .and_then(|raw| raw.parse::<f64>().ok());
    if let Some(sensitivity) = sensitivity {
        if sensitivity != 0.0
            && ((gain_product - sensitivity) / sensitivity).abs() > GAIN_TOLERANCE
        {
            return Err(ValidationError::GainMismatch(label.to_string()));
        }
    }
    Ok(())
}

fn validate_fir(label: &str, fir: &Element) -> Result<(), ValidationError> {
    let unit_name = |parent: &str| -> Option<String> {
        child_elements(fir, parent)
            .next()
            .and_then(|units| child_text(units, "Name"))
    };
    let input = unit_name("InputUnits");
    let output = unit_name("OutputUnits");
    if input.as_deref() != Some("COUNTS") || output.as_deref() != Some("COUNTS") {
        return Err(ValidationError::BadFIRUnits(label.to_string()));
    }

    let mut sum = 0.0f64;
    for numerator in child_elements(fir, "NumeratorCoefficient") {
        let value = text_of(numerator).parse::<f64>().map_err(|_| {
            ValidationError::SchemaInvalid(format!(
                "channel {label} has a non-numeric FIR coefficient"
            ))
        })?;
        sum += value;
    }
    // Symmetric filters store only half the coefficients.
    let symmetry = child_text(fir, "Symmetry").unwrap_or_else(|| "NONE".to_string());
    if symmetry != "NONE" {
        sum *= 2.0;
    }

    let delta = (1.0 - sum).abs();
    if delta > FIR_SUM_TOLERANCE {
        return Err(ValidationError::BadFIRCoefficients(label.to_string(), delta));
    }
    Ok(())
}
