use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdError {
    Timeout,
    Crc,
    DataTimeout,
    DataCrc,
    Busy,
    DmaMap,
    BadSegment,
    DescOverflow,
    BounceOverflow,
    CalibrationFailed,
    TuningFailed,
    InvalidArgument,
}

impl SdError {
    /// Errors raised by the bus itself, which the retry path may heal.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SdError::Timeout | SdError::Crc | SdError::DataTimeout | SdError::DataCrc
        )
    }
}

impl fmt::Display for SdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdError::Timeout => write!(f, "Command response timeout"),
            SdError::Crc => write!(f, "Command response CRC error"),
            SdError::DataTimeout => write!(f, "Data transfer timeout"),
            SdError::DataCrc => write!(f, "Data CRC error"),
            SdError::Busy => write!(f, "Host already has a request in flight"),
            SdError::DmaMap => write!(f, "Failed to map buffer for DMA"),
            SdError::BadSegment => write!(f, "Scatter segment length cannot be encoded"),
            SdError::DescOverflow => write!(f, "Descriptor chain exceeds descriptor memory"),
            SdError::BounceOverflow => write!(f, "Transfer exceeds bounce buffer"),
            SdError::CalibrationFailed => write!(f, "Line delay calibration failed"),
            SdError::TuningFailed => write!(f, "No passing tuning window"),
            SdError::InvalidArgument => write!(f, "Invalid argument"),
        }
    }
}
