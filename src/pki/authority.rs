// Copyright 2025 The Multicluster Observability Operator Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Key and certificate generation for both trust domains.

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use snafu::{ResultExt, Snafu};
use std::net::IpAddr;
use strum::Display;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::{FromDer, X509Certificate};

/// Root and intermediate CAs.
pub const CA_VALIDITY_DAYS: i64 = 5 * 365;
pub const LEAF_VALIDITY_DAYS: i64 = 365;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to generate key: {}", source))]
    KeyGeneration { source: rcgen::Error },

    #[snafu(display("failed to sign certificate: {}", source))]
    Signing { source: rcgen::Error },

    #[snafu(display("failed to load issuer: {}", source))]
    IssuerKey { source: rcgen::Error },

    #[snafu(display("invalid PEM: {}", source))]
    Pem { source: pem::PemError },

    #[snafu(display("invalid certificate: {}", message))]
    Parse { message: String },

    #[snafu(display("'{}' is not a valid DNS name", host))]
    InvalidHost { host: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum Usage {
    #[strum(to_string = "serverAuth")]
    ServerAuth,
    #[strum(to_string = "clientAuth")]
    ClientAuth,
}

/// PEM material in the layout of a certificate secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyMaterial {
    /// Trust anchor: the issuing CA certificate, or the certificate itself for a root.
    pub ca_crt: String,
    pub tls_crt: String,
    pub tls_key: String,
}

#[derive(Clone, Debug, Default)]
pub struct CertRequest {
    pub common_name: String,
    pub organization: Option<String>,
    pub organizational_unit: Option<String>,
    /// Extra hosts. IP literals become IP SANs, everything else DNS SANs.
    pub hosts: Vec<String>,
    pub is_ca: bool,
    pub usage: Option<Usage>,
}

fn new_key() -> Result<KeyPair> {
    KeyPair::generate_rsa_for(&rcgen::PKCS_RSA_SHA256, rcgen::RsaKeySize::_2048)
        .context(KeyGenerationSnafu)
}

fn validity(days: i64) -> (time::OffsetDateTime, time::OffsetDateTime) {
    let now = time::OffsetDateTime::now_utc();
    (now, now + time::Duration::days(days))
}

fn subject(request: &CertRequest) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(request.common_name.clone()),
    );
    if let Some(org) = &request.organization {
        dn.push(DnType::OrganizationName, DnValue::Utf8String(org.clone()));
    }
    if let Some(ou) = &request.organizational_unit {
        dn.push(
            DnType::OrganizationalUnitName,
            DnValue::Utf8String(ou.clone()),
        );
    }
    dn
}

fn subject_alt_names(request: &CertRequest) -> Result<Vec<SanType>> {
    let mut hosts: Vec<&str> = Vec::new();
    for host in std::iter::once(&request.common_name).chain(&request.hosts) {
        if !host.is_empty() && !hosts.contains(&host.as_str()) {
            hosts.push(host);
        }
    }

    hosts
        .into_iter()
        .map(|host| match host.parse::<IpAddr>() {
            Ok(ip) => Ok(SanType::IpAddress(ip)),
            Err(_) => rcgen::string::Ia5String::try_from(host)
                .map(SanType::DnsName)
                .map_err(|_| Error::InvalidHost {
                    host: host.to_string(),
                }),
        })
        .collect()
}

fn params_for(request: &CertRequest) -> Result<CertificateParams> {
    let mut params = CertificateParams::default();
    params.distinguished_name = subject(request);

    let days = if request.is_ca {
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
            KeyUsagePurpose::KeyCertSign,
        ];
        CA_VALIDITY_DAYS
    } else {
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = match request.usage {
            Some(Usage::ServerAuth) => vec![ExtendedKeyUsagePurpose::ServerAuth],
            Some(Usage::ClientAuth) => vec![ExtendedKeyUsagePurpose::ClientAuth],
            None => Vec::new(),
        };
        params.subject_alt_names = subject_alt_names(request)?;
        LEAF_VALIDITY_DAYS
    };

    let (not_before, not_after) = validity(days);
    params.not_before = not_before;
    params.not_after = not_after;
    Ok(params)
}

/// A self-signed root CA.
pub fn new_root_ca(common_name: &str) -> Result<KeyMaterial> {
    let request = CertRequest {
        common_name: common_name.to_string(),
        is_ca: true,
        ..Default::default()
    };
    let key = new_key()?;
    let cert = params_for(&request)?
        .self_signed(&key)
        .context(SigningSnafu)?
        .pem();

    Ok(KeyMaterial {
        ca_crt: cert.clone(),
        tls_crt: cert,
        tls_key: key.serialize_pem(),
    })
}

/// Signs a fresh key pair for `request` with the CA in `issuer`.
pub fn issue(issuer: &KeyMaterial, request: &CertRequest) -> Result<KeyMaterial> {
    let ca_key = KeyPair::from_pem(&issuer.tls_key).context(IssuerKeySnafu)?;
    let ca = Issuer::from_ca_cert_pem(&issuer.tls_crt, &ca_key).context(IssuerKeySnafu)?;

    let key = new_key()?;
    let cert = params_for(request)?
        .signed_by(&key, &ca)
        .context(SigningSnafu)?
        .pem();

    Ok(KeyMaterial {
        ca_crt: issuer.tls_crt.clone(),
        tls_crt: cert,
        tls_key: key.serialize_pem(),
    })
}

fn der_of(cert_pem: &str) -> Result<Vec<u8>> {
    Ok(pem::parse(cert_pem.as_bytes())
        .context(PemSnafu)?
        .contents()
        .to_vec())
}

fn parse(der: &[u8]) -> Result<X509Certificate<'_>> {
    X509Certificate::from_der(der)
        .map(|(_, cert)| cert)
        .map_err(|e| Error::Parse {
            message: e.to_string(),
        })
}

/// Validity window of a certificate, in unix seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Validity {
    pub not_before: i64,
    pub not_after: i64,
}

impl Validity {
    pub fn of(cert_pem: &str) -> Result<Self> {
        let der = der_of(cert_pem)?;
        let cert = parse(&der)?;
        Ok(Self {
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
        })
    }

    /// True once `now` is within the last fifth of the window.
    pub fn renewal_due(&self, now: i64) -> bool {
        let lifetime = self.not_after - self.not_before;
        now >= self.not_after - lifetime / 5
    }
}

/// DNS names and IP addresses a certificate is valid for.
pub fn subject_alt_names_of(cert_pem: &str) -> Result<Vec<String>> {
    let der = der_of(cert_pem)?;
    let cert = parse(&der)?;
    let extension = cert
        .subject_alternative_name()
        .map_err(|e| Error::Parse {
            message: e.to_string(),
        })?;

    let Some(extension) = extension else {
        return Ok(Vec::new());
    };
    Ok(extension
        .value
        .general_names
        .iter()
        .filter_map(|name| match name {
            GeneralName::DNSName(dns) => Some(dns.to_string()),
            GeneralName::IPAddress(bytes) => match bytes.len() {
                4 => <[u8; 4]>::try_from(*bytes)
                    .ok()
                    .map(|b| IpAddr::from(b).to_string()),
                16 => <[u8; 16]>::try_from(*bytes)
                    .ok()
                    .map(|b| IpAddr::from(b).to_string()),
                _ => None,
            },
            _ => None,
        })
        .collect())
}

/// True when `cert_pem` carries a valid signature by the CA in `ca_pem`.
pub fn verify_issued_by(cert_pem: &str, ca_pem: &str) -> Result<bool> {
    let cert_der = der_of(cert_pem)?;
    let ca_der = der_of(ca_pem)?;
    let cert = parse(&cert_der)?;
    let ca = parse(&ca_der)?;

    Ok(cert.issuer() == ca.subject() && cert.verify_signature(Some(ca.public_key())).is_ok())
}
