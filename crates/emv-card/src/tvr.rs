//! Terminal Verification Results (95) and Transaction Status Information (9B)
//!
//! Both are append-only for the lifetime of one transaction: bits are set,
//! never cleared, and the whole ledger is replaced with zeros when the next
//! transaction starts.

use std::fmt;

/// One bit of the Terminal Verification Results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TvrFlag {
    // Byte 1
    OfflineDataAuthenticationNotPerformed,
    SdaFailed,
    IccDataMissing,
    CardOnExceptionFile,
    DdaFailed,
    CdaFailed,
    SdaSelected,
    // Byte 2
    DifferentApplicationVersions,
    ExpiredApplication,
    ApplicationNotYetEffective,
    ServiceNotAllowed,
    NewCard,
    // Byte 3
    CardholderVerificationNotSuccessful,
    UnrecognisedCvm,
    PinTryLimitExceeded,
    PinPadNotPresent,
    PinNotEntered,
    OnlinePinEntered,
    // Byte 4
    FloorLimitExceeded,
    LowerConsecutiveOfflineLimitExceeded,
    UpperConsecutiveOfflineLimitExceeded,
    SelectedRandomlyForOnline,
    MerchantForcedOnline,
    // Byte 5
    DefaultTdolUsed,
    IssuerAuthenticationFailed,
    ScriptFailedBeforeGenerateAc,
    ScriptFailedAfterGenerateAc,
}

impl TvrFlag {
    pub const ALL: [TvrFlag; 27] = [
        TvrFlag::OfflineDataAuthenticationNotPerformed,
        TvrFlag::SdaFailed,
        TvrFlag::IccDataMissing,
        TvrFlag::CardOnExceptionFile,
        TvrFlag::DdaFailed,
        TvrFlag::CdaFailed,
        TvrFlag::SdaSelected,
        TvrFlag::DifferentApplicationVersions,
        TvrFlag::ExpiredApplication,
        TvrFlag::ApplicationNotYetEffective,
        TvrFlag::ServiceNotAllowed,
        TvrFlag::NewCard,
        TvrFlag::CardholderVerificationNotSuccessful,
        TvrFlag::UnrecognisedCvm,
        TvrFlag::PinTryLimitExceeded,
        TvrFlag::PinPadNotPresent,
        TvrFlag::PinNotEntered,
        TvrFlag::OnlinePinEntered,
        TvrFlag::FloorLimitExceeded,
        TvrFlag::LowerConsecutiveOfflineLimitExceeded,
        TvrFlag::UpperConsecutiveOfflineLimitExceeded,
        TvrFlag::SelectedRandomlyForOnline,
        TvrFlag::MerchantForcedOnline,
        TvrFlag::DefaultTdolUsed,
        TvrFlag::IssuerAuthenticationFailed,
        TvrFlag::ScriptFailedBeforeGenerateAc,
        TvrFlag::ScriptFailedAfterGenerateAc,
    ];

    /// Byte index (0-based) and bit mask
    pub fn position(self) -> (usize, u8) {
        use TvrFlag::*;
        match self {
            OfflineDataAuthenticationNotPerformed => (0, 0x80),
            SdaFailed => (0, 0x40),
            IccDataMissing => (0, 0x20),
            CardOnExceptionFile => (0, 0x10),
            DdaFailed => (0, 0x08),
            CdaFailed => (0, 0x04),
            SdaSelected => (0, 0x02),
            DifferentApplicationVersions => (1, 0x80),
            ExpiredApplication => (1, 0x40),
            ApplicationNotYetEffective => (1, 0x20),
            ServiceNotAllowed => (1, 0x10),
            NewCard => (1, 0x08),
            CardholderVerificationNotSuccessful => (2, 0x80),
            UnrecognisedCvm => (2, 0x40),
            PinTryLimitExceeded => (2, 0x20),
            PinPadNotPresent => (2, 0x10),
            PinNotEntered => (2, 0x08),
            OnlinePinEntered => (2, 0x04),
            FloorLimitExceeded => (3, 0x80),
            LowerConsecutiveOfflineLimitExceeded => (3, 0x40),
            UpperConsecutiveOfflineLimitExceeded => (3, 0x20),
            SelectedRandomlyForOnline => (3, 0x10),
            MerchantForcedOnline => (3, 0x08),
            DefaultTdolUsed => (4, 0x80),
            IssuerAuthenticationFailed => (4, 0x40),
            ScriptFailedBeforeGenerateAc => (4, 0x20),
            ScriptFailedAfterGenerateAc => (4, 0x10),
        }
    }

    pub fn description(self) -> &'static str {
        use TvrFlag::*;
        match self {
            OfflineDataAuthenticationNotPerformed => "Offline data authentication was not performed",
            SdaFailed => "SDA failed",
            IccDataMissing => "ICC data missing",
            CardOnExceptionFile => "Card appears on terminal exception file",
            DdaFailed => "DDA failed",
            CdaFailed => "CDA failed",
            SdaSelected => "SDA selected",
            DifferentApplicationVersions => "ICC and terminal have different application versions",
            ExpiredApplication => "Expired application",
            ApplicationNotYetEffective => "Application not yet effective",
            ServiceNotAllowed => "Requested service not allowed for card product",
            NewCard => "New card",
            CardholderVerificationNotSuccessful => "Cardholder verification was not successful",
            UnrecognisedCvm => "Unrecognised CVM",
            PinTryLimitExceeded => "PIN Try Limit exceeded",
            PinPadNotPresent => "PIN entry required and PIN pad not present or not working",
            PinNotEntered => "PIN entry required, PIN pad present, but PIN was not entered",
            OnlinePinEntered => "Online PIN entered",
            FloorLimitExceeded => "Transaction exceeds floor limit",
            LowerConsecutiveOfflineLimitExceeded => "Lower consecutive offline limit exceeded",
            UpperConsecutiveOfflineLimitExceeded => "Upper consecutive offline limit exceeded",
            SelectedRandomlyForOnline => "Transaction selected randomly for online processing",
            MerchantForcedOnline => "Merchant forced transaction online",
            DefaultTdolUsed => "Default TDOL used",
            IssuerAuthenticationFailed => "Issuer authentication failed",
            ScriptFailedBeforeGenerateAc => "Script processing failed before final GENERATE AC",
            ScriptFailedAfterGenerateAc => "Script processing failed after final GENERATE AC",
        }
    }
}

/// One bit of the Transaction Status Information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TsiFlag {
    OfflineDataAuthenticationPerformed,
    CardholderVerificationPerformed,
    CardRiskManagementPerformed,
    IssuerAuthenticationPerformed,
    TerminalRiskManagementPerformed,
    ScriptProcessingPerformed,
}

impl TsiFlag {
    pub const ALL: [TsiFlag; 6] = [
        TsiFlag::OfflineDataAuthenticationPerformed,
        TsiFlag::CardholderVerificationPerformed,
        TsiFlag::CardRiskManagementPerformed,
        TsiFlag::IssuerAuthenticationPerformed,
        TsiFlag::TerminalRiskManagementPerformed,
        TsiFlag::ScriptProcessingPerformed,
    ];

    pub fn position(self) -> (usize, u8) {
        match self {
            TsiFlag::OfflineDataAuthenticationPerformed => (0, 0x80),
            TsiFlag::CardholderVerificationPerformed => (0, 0x40),
            TsiFlag::CardRiskManagementPerformed => (0, 0x20),
            TsiFlag::IssuerAuthenticationPerformed => (0, 0x10),
            TsiFlag::TerminalRiskManagementPerformed => (0, 0x08),
            TsiFlag::ScriptProcessingPerformed => (0, 0x04),
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            TsiFlag::OfflineDataAuthenticationPerformed => "Offline data authentication was performed",
            TsiFlag::CardholderVerificationPerformed => "Cardholder verification was performed",
            TsiFlag::CardRiskManagementPerformed => "Card risk management was performed",
            TsiFlag::IssuerAuthenticationPerformed => "Issuer authentication was performed",
            TsiFlag::TerminalRiskManagementPerformed => "Terminal risk management was performed",
            TsiFlag::ScriptProcessingPerformed => "Script processing was performed",
        }
    }
}

/// Terminal Verification Results (tag 95)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TerminalVerificationResults([u8; 5]);

impl TerminalVerificationResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, flag: TvrFlag) {
        let (byte, mask) = flag.position();
        if self.0[byte] & mask == 0 {
            tracing::debug!(flag = flag.description(), "TVR bit set");
        }
        self.0[byte] |= mask;
    }

    pub fn is_set(&self, flag: TvrFlag) -> bool {
        let (byte, mask) = flag.position();
        self.0[byte] & mask != 0
    }

    pub fn bytes(&self) -> [u8; 5] {
        self.0
    }

    /// Flags currently set, in bit order
    pub fn flags(&self) -> impl Iterator<Item = TvrFlag> + '_ {
        TvrFlag::ALL.into_iter().filter(move |f| self.is_set(*f))
    }
}

impl fmt::Display for TerminalVerificationResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

/// Transaction Status Information (tag 9B)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionStatusInformation([u8; 2]);

impl TransactionStatusInformation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, flag: TsiFlag) {
        let (byte, mask) = flag.position();
        self.0[byte] |= mask;
    }

    pub fn is_set(&self, flag: TsiFlag) -> bool {
        let (byte, mask) = flag.position();
        self.0[byte] & mask != 0
    }

    pub fn bytes(&self) -> [u8; 2] {
        self.0
    }

    pub fn flags(&self) -> impl Iterator<Item = TsiFlag> + '_ {
        TsiFlag::ALL.into_iter().filter(move |f| self.is_set(*f))
    }
}

impl fmt::Display for TransactionStatusInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}
