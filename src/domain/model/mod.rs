//! Typed records for institutions and certificates.
//!
//! Constructors validate their input, so any value of these types already satisfies the
//! field-level rules in [`crate::domain::validate`].

mod certificate;
mod institution;
mod types;

pub use certificate::{
    into_result, Certificate, CertificateDraft, CertificateStats, IssuanceKey,
    IssuanceReservation, IssueCertificateInput, IssueDocumentInput, IssueRequest, SearchQuery,
    SearchScope, StudentCertificate, TypeCount,
};
pub use institution::{
    ContactInfo, Institution, LoginRequest, NewInstitution, RegisterInstitution,
    ValidRegistration,
};
pub use types::{
    deserialize_date, parse_date, truncate_to_millis, CertificateType, IpfsHash, WalletAddress,
};
