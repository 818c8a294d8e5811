/// First-failure outcome of validating a StationXML document.
///
/// The validator walks the document in order and returns the first rule it
/// finds violated; callers decide whether that means rejecting a staged
/// record or aborting an intake request.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("document does not conform to StationXML: {0}")]
    SchemaInvalid(String),
    #[error("unsupported StationXML schema version {0:?}")]
    UnsupportedSchemaVersion(String),
    #[error("invalid network code {0:?}")]
    BadNetworkCode(String),
    #[error("invalid station code {0:?}")]
    BadStationCode(String),
    #[error("station {0} defines no channels")]
    NoChannels(String),
    #[error("channel {0} has a missing, zero or non-finite sample rate")]
    BadSampleRate(String),
    #[error("channel {0} has no instrument response")]
    MissingResponse(String),
    #[error("channel {0} has multiple instrument responses")]
    DuplicateResponse(String),
    #[error("channel {0} has an instrument response without stages")]
    NoStages(String),
    #[error("channel {0} has a FIR stage with input or output units other than COUNTS")]
    BadFIRUnits(String),
    #[error("channel {0} has FIR coefficients summing {1} away from unity")]
    BadFIRCoefficients(String, f64),
    #[error("channel {0} instrument sensitivity deviates from the product of its stage gains")]
    GainMismatch(String),
}

impl ValidationError {
    /// The bare kind tag of this error, as recorded on rejected index
    /// records and shown in the UI. The Display form carries the detail
    /// for logs and HTTP responses.
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::SchemaInvalid(_) => "SchemaInvalid",
            ValidationError::UnsupportedSchemaVersion(_) => "UnsupportedSchemaVersion",
            ValidationError::BadNetworkCode(_) => "BadNetworkCode",
            ValidationError::BadStationCode(_) => "BadStationCode",
            ValidationError::NoChannels(_) => "NoChannels",
            ValidationError::BadSampleRate(_) => "BadSampleRate",
            ValidationError::MissingResponse(_) => "MissingResponse",
            ValidationError::DuplicateResponse(_) => "DuplicateResponse",
            ValidationError::NoStages(_) => "NoStages",
            ValidationError::BadFIRUnits(_) => "BadFIRUnits",
            ValidationError::BadFIRCoefficients(..) => "BadFIRCoefficients",
            ValidationError::GainMismatch(_) => "GainMismatch",
        }
    }
}

#[cfg(test)]
mod test {
    use super::ValidationError;

    #[test]
    fn kind_is_the_bare_tag() {
        assert_eq!(
            ValidationError::GainMismatch("XX.STA01.HHZ".to_string()).kind(),
            "GainMismatch"
        );
        assert_eq!(
            ValidationError::BadFIRCoefficients("XX.STA01.HHZ".to_string(), 0.5).kind(),
            "BadFIRCoefficients"
        );
        // The Display form stays descriptive.
        let err = ValidationError::GainMismatch("XX.STA01.HHZ".to_string());
        assert!(err.to_string().contains("XX.STA01.HHZ"));
    }
}
