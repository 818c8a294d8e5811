//! Parsing, validation, and decomposition of FDSN StationXML documents.
//!
//! A multi-station upload is split into one artifact per `(Network, Station)`
//! pair. Each artifact carries the canonicalized `Network` subtree holding
//! just that station, the hex SHA-256 of that canonical form (the stable
//! identity of the submission), and a complete wrapped document suitable for
//! storage and for the downstream converter.

use chrono::Utc;
use models::NetworkKey;
use xmltree::{Element, XMLNode};

mod canonical;
mod error;
mod validate;

pub use canonical::{canonical_hash, hash_bytes, serialize, strip_empty_default_ns};
pub use error::ValidationError;
pub use validate::{parse_time, NetworkHeader, SUPPORTED_SCHEMA_VERSION};

use validate::{child_elements, network_header_of, parse_root, station_code_of, validate_station};

/// Default namespace of FDSN StationXML documents.
pub const NAMESPACE: &str = "http://www.fdsn.org/xml/station/1";

const DOCUMENT_SOURCE: &str = "stationward";
const DOCUMENT_SENDER: &str = "stationward";
const DOCUMENT_MODULE: &str = concat!("stationward/", env!("CARGO_PKG_VERSION"));

/// One station's worth of validated metadata, cut out of a submission.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub network: NetworkKey,
    pub restricted: bool,
    pub description: Option<String>,
    pub station: String,
    pub channel_count: u32,
    /// Canonical serialization of the single-station `Network` element.
    pub canonical: String,
    /// Hex SHA-256 of `canonical`; the identity of this submission.
    pub hash: String,
    /// Complete StationXML document wrapping `canonical`, as persisted to
    /// the blob store and handed to the converter.
    pub document: Vec<u8>,
}

/// Split a StationXML document into per-station artifacts, validating as we
/// go. Returns the first violated rule, if any.
pub fn split(bytes: &[u8]) -> Result<Vec<Artifact>, ValidationError> {
    let root = parse_root(bytes)?;
    let networks: Vec<&Element> = child_elements(&root, "Network").collect();
    if networks.is_empty() {
        return Err(ValidationError::SchemaInvalid(
            "document has no Network element".to_string(),
        ));
    }

    let mut artifacts = Vec::new();
    for network_el in networks {
        let header = network_header_of(network_el)?;

        for station_el in child_elements(network_el, "Station") {
            let station = station_code_of(station_el)?;
            let label = format!("{}.{station}", header.network.code);
            validate_station(&label, station_el)?;

            let channel_count = child_elements(station_el, "Channel").count() as u32;
            let single = single_station_network(network_el, station_el);
            let (canonical, hash) = canonical_hash(&single);
            let document = wrap_document(&canonical);

            artifacts.push(Artifact {
                network: header.network.clone(),
                restricted: header.restricted,
                description: header.description.clone(),
                station,
                channel_count,
                canonical,
                hash,
                document,
            });
        }
    }
    Ok(artifacts)
}

/// Header attributes and canonical hash of the first `Network` element.
/// Used to ingest network prototype documents, which are validated for
/// shape but not for channel-level rules.
#[derive(Debug, Clone)]
pub struct PrototypeHeader {
    pub network: NetworkKey,
    pub restricted: bool,
    pub description: Option<String>,
    pub hash: String,
}

pub fn network_header(bytes: &[u8]) -> Result<PrototypeHeader, ValidationError> {
    let root = parse_root(bytes)?;
    let network_el = child_elements(&root, "Network").next().ok_or_else(|| {
        ValidationError::SchemaInvalid("document has no Network element".to_string())
    })?;
    let header = network_header_of(network_el)?;
    let (_, hash) = canonical_hash(network_el);
    Ok(PrototypeHeader {
        network: header.network,
        restricted: header.restricted,
        description: header.description,
        hash,
    })
}

/// Canonical hash of the first `Network` element of a document, without any
/// business-rule validation. The availability checker compares this against
/// the hash recorded at submission time.
pub fn canonical_network_hash(bytes: &[u8]) -> Result<String, ValidationError> {
    let root = parse_root(bytes)?;
    let network_el = child_elements(&root, "Network").next().ok_or_else(|| {
        ValidationError::SchemaInvalid("document has no Network element".to_string())
    })?;
    Ok(canonical_hash(network_el).1)
}

/// Clone `network` with its stations stripped, then re-attach the single
/// `station`. Non-station children (description, comments on the wire) are
/// preserved in order.
fn single_station_network(network: &Element, station: &Element) -> Element {
    let mut clone = network.clone();
    clone
        .children
        .retain(|node| !matches!(node, XMLNode::Element(el) if el.name == "Station"));
    clone.children.push(XMLNode::Element(station.clone()));
    clone
}

/// Wrap a canonical `Network` serialization in a complete StationXML
/// document with the fixed provenance header.
fn wrap_document(network_canonical: &str) -> Vec<u8> {
    let created = Utc::now().format("%Y-%m-%dT%H:%M:%S");
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <FDSNStationXML xmlns=\"{NAMESPACE}\" schemaVersion=\"{SUPPORTED_SCHEMA_VERSION}\">\
         <Source>{DOCUMENT_SOURCE}</Source>\
         <Sender>{DOCUMENT_SENDER}</Sender>\
         <Module>{DOCUMENT_MODULE}</Module>\
         <Created>{created}</Created>\
         {network_canonical}\
         </FDSNStationXML>"
    )
    .into_bytes()
}

#[cfg(test)]
mod test {
    use super::*;

    fn channel(code: &str, sample_rate: &str, gain: &str, sensitivity: &str) -> String {
        format!(
            r#"<Channel code="{code}" locationCode="">
                 <SampleRate>{sample_rate}</SampleRate>
                 <Response>
                   <InstrumentSensitivity><Value>{sensitivity}</Value></InstrumentSensitivity>
                   <Stage number="1"><StageGain><Value>{gain}</Value></StageGain></Stage>
                 </Response>
               </Channel>"#
        )
    }

    fn document(networks: &str) -> Vec<u8> {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
               <FDSNStationXML xmlns="{NAMESPACE}" schemaVersion="1.0">
                 <Source>Test</Source>
                 <Created>2024-01-01T00:00:00</Created>
                 {networks}
               </FDSNStationXML>"#
        )
        .into_bytes()
    }

    fn station(code: &str, channels: &str) -> String {
        format!(r#"<Station code="{code}" startDate="2020-01-01T00:00:00">{channels}</Station>"#)
    }

    fn network(attrs: &str, stations: &str) -> String {
        format!(
            r#"<Network code="XX" startDate="2020-01-01T00:00:00" {attrs}>
                 <Description>Test network</Description>
                 {stations}
               </Network>"#
        )
    }

    fn valid_station(code: &str) -> String {
        station(code, &channel("HHZ", "100.0", "1024.0", "1024.0"))
    }

    #[test]
    fn splits_into_one_artifact_per_station() {
        let doc = document(&network(
            "",
            &format!("{}{}", valid_station("STA01"), valid_station("STA02")),
        ));
        let artifacts = split(&doc).unwrap();
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].station, "STA01");
        assert_eq!(artifacts[1].station, "STA02");
        assert_eq!(artifacts[0].network.code, "XX");
        assert_eq!(artifacts[0].channel_count, 1);
        assert_ne!(artifacts[0].hash, artifacts[1].hash);
        // Hashes are 64 lower-case hex characters.
        assert_eq!(artifacts[0].hash.len(), 64);
        assert!(artifacts[0].hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn identical_submissions_hash_equal() {
        let doc = document(&network("", &valid_station("STA01")));
        let a = split(&doc).unwrap();
        let b = split(&doc).unwrap();
        assert_eq!(a[0].hash, b[0].hash);
        assert_eq!(a[0].canonical, b[0].canonical);
    }

    #[test]
    fn stored_document_reproduces_the_hash() {
        let doc = document(&network("", &valid_station("STA01")));
        let artifact = &split(&doc).unwrap()[0];
        assert_eq!(
            canonical_network_hash(&artifact.document).unwrap(),
            artifact.hash
        );
    }

    #[test]
    fn rejects_unsupported_schema_version() {
        let doc = format!(
            r#"<FDSNStationXML xmlns="{NAMESPACE}" schemaVersion="2.0"><Network code="XX" startDate="2020-01-01"/></FDSNStationXML>"#
        );
        assert!(matches!(
            split(doc.as_bytes()),
            Err(ValidationError::UnsupportedSchemaVersion(v)) if v == "2.0"
        ));
    }

    #[test]
    fn rejects_malformed_xml() {
        assert!(matches!(
            split(b"<FDSNStationXML"),
            Err(ValidationError::SchemaInvalid(_))
        ));
    }

    #[test]
    fn rejects_station_without_channels() {
        let doc = document(&network("", &station("STA01", "")));
        assert!(matches!(
            split(&doc),
            Err(ValidationError::NoChannels(label)) if label == "XX.STA01"
        ));
    }

    #[test]
    fn rejects_zero_sample_rate() {
        let doc = document(&network(
            "",
            &station("STA01", &channel("HHZ", "0.0", "1.0", "1.0")),
        ));
        assert!(matches!(split(&doc), Err(ValidationError::BadSampleRate(_))));
    }

    #[test]
    fn log_channels_are_exempt() {
        let log = r#"<Channel code="LOG" locationCode=""></Channel>"#;
        let doc = document(&network(
            "",
            &station(
                "STA01",
                &format!("{}{log}", channel("HHZ", "100.0", "1024.0", "1024.0")),
            ),
        ));
        let artifacts = split(&doc).unwrap();
        assert_eq!(artifacts[0].channel_count, 2);
    }

    #[test]
    fn rejects_missing_and_duplicate_responses() {
        let bare = r#"<Channel code="HHZ"><SampleRate>100.0</SampleRate></Channel>"#;
        let doc = document(&network("", &station("STA01", bare)));
        assert!(matches!(split(&doc), Err(ValidationError::MissingResponse(_))));

        let doubled = r#"<Channel code="HHZ"><SampleRate>100.0</SampleRate>
            <Response><Stage number="1"/></Response>
            <Response><Stage number="1"/></Response></Channel>"#;
        let doc = document(&network("", &station("STA01", doubled)));
        assert!(matches!(split(&doc), Err(ValidationError::DuplicateResponse(_))));
    }

    #[test]
    fn rejects_response_without_stages() {
        let empty = r#"<Channel code="HHZ"><SampleRate>100.0</SampleRate><Response></Response></Channel>"#;
        let doc = document(&network("", &station("STA01", empty)));
        assert!(matches!(split(&doc), Err(ValidationError::NoStages(_))));
    }

    fn fir_channel(units: &str, symmetry: &str, numerators: &[f64]) -> String {
        let coefficients: String = numerators
            .iter()
            .map(|c| format!("<NumeratorCoefficient>{c}</NumeratorCoefficient>"))
            .collect();
        format!(
            r#"<Channel code="HHZ" locationCode="">
                 <SampleRate>100.0</SampleRate>
                 <Response>
                   <Stage number="1">
                     <FIR>
                       <InputUnits><Name>{units}</Name></InputUnits>
                       <OutputUnits><Name>{units}</Name></OutputUnits>
                       <Symmetry>{symmetry}</Symmetry>
                       {coefficients}
                     </FIR>
                     <StageGain><Value>1.0</Value></StageGain>
                   </Stage>
                 </Response>
               </Channel>"#
        )
    }

    #[test]
    fn fir_sum_within_tolerance_passes() {
        // 1 + 1/64 = 1.015625, exactly representable; delta 0.015625 < 0.02.
        let doc = document(&network(
            "",
            &station("STA01", &fir_channel("COUNTS", "NONE", &[0.5, 0.515625])),
        ));
        assert!(split(&doc).is_ok());
    }

    #[test]
    fn fir_sum_outside_tolerance_fails() {
        // 1 + 1/32 = 1.03125; delta 0.03125 > 0.02.
        let doc = document(&network(
            "",
            &station("STA01", &fir_channel("COUNTS", "NONE", &[0.5, 0.53125])),
        ));
        assert!(matches!(
            split(&doc),
            Err(ValidationError::BadFIRCoefficients(_, delta)) if delta > 0.02
        ));
    }

    #[test]
    fn fir_symmetry_doubles_the_sum() {
        // Stored half sums to 0.5; EVEN symmetry doubles it to exactly 1.
        let doc = document(&network(
            "",
            &station("STA01", &fir_channel("COUNTS", "EVEN", &[0.25, 0.25])),
        ));
        assert!(split(&doc).is_ok());

        // Without doubling the same half fails.
        let doc = document(&network(
            "",
            &station("STA01", &fir_channel("COUNTS", "NONE", &[0.25, 0.25])),
        ));
        assert!(matches!(split(&doc), Err(ValidationError::BadFIRCoefficients(..))));
    }

    #[test]
    fn fir_units_must_be_counts() {
        let doc = document(&network(
            "",
            &station("STA01", &fir_channel("M/S", "NONE", &[1.0])),
        ));
        assert!(matches!(split(&doc), Err(ValidationError::BadFIRUnits(_))));
    }

    #[test]
    fn gain_product_must_match_sensitivity() {
        // 1024 vs 1026: relative deviation ~0.00195 > 0.001.
        let doc = document(&network(
            "",
            &station("STA01", &channel("HHZ", "100.0", "1026.0", "1024.0")),
        ));
        assert!(matches!(split(&doc), Err(ValidationError::GainMismatch(_))));

        // 1024 vs 1024.5: relative deviation ~0.00049 passes.
        let doc = document(&network(
            "",
            &station("STA01", &channel("HHZ", "100.0", "1024.5", "1024.0")),
        ));
        assert!(split(&doc).is_ok());
    }

    #[test]
    fn prototype_header_round_trip() {
        let doc = document(&network(r#"restrictedStatus="closed" endDate="2030-01-01T00:00:00""#, ""));
        let header = network_header(&doc).unwrap();
        assert_eq!(header.network.code, "XX");
        assert!(header.restricted);
        assert_eq!(header.description.as_deref(), Some("Test network"));
        assert_eq!(
            header.network.end,
            Some("2030-01-01T00:00:00Z".parse().unwrap())
        );

        // Byte-identical re-ingest yields the same hash.
        assert_eq!(network_header(&doc).unwrap().hash, header.hash);
    }
}
