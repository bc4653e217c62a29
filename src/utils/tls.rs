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

use rustls::crypto::ring::sign;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use rustls_pemfile::Item;
use snafu::{ResultExt, Snafu};
use std::io::{self, Cursor};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("parse certificate error"))]
    InvalidCertificate { source: io::Error },

    #[snafu(display("no certificate"))]
    NonCertificate,

    #[snafu(display("parse private key error"))]
    InvalidPrivateKey { source: io::Error },

    #[snafu(display("no private key"))]
    NonPrivateKey,

    #[snafu(display("key pair match failed"))]
    MatchFailed { source: rustls::Error },

    #[snafu(display("no supported sign type"))]
    NoSupportedSignType { source: rustls::Error },

    #[snafu(display("no supported pem type"))]
    NoSupportedPEMType,
}

// load certificates from PEM file
fn load_certs(cert: &[u8]) -> Result<Vec<CertificateDer<'static>>, Error> {
    let certs = rustls_pemfile::certs(&mut Cursor::new(cert))
        .collect::<Result<Vec<CertificateDer<'static>>, _>>()
        .context(InvalidCertificateSnafu)?;

    if certs.is_empty() {
        return NonCertificateSnafu.fail();
    }

    Ok(certs)
}

fn load_private_key(private_key: &[u8]) -> Result<PrivateKeyDer<'static>, Error> {
    let item = rustls_pemfile::read_one(&mut Cursor::new(private_key))
        .context(InvalidPrivateKeySnafu)?
        .ok_or(Error::NonPrivateKey)?;

    // only pkcs8/pkcs1/sec1 supported
    Ok(match item {
        Item::Pkcs8Key(key) => key.into(),
        Item::Pkcs1Key(key) => key.into(),
        Item::Sec1Key(key) => key.into(),
        _ => return NoSupportedPEMTypeSnafu.fail(),
    })
}

/// Checks that `key_pem` is the private key of the first certificate in `cert_pem`.
pub fn x509_key_pair<T: AsRef<[u8]>>(cert_pem: T, key_pem: T) -> Result<(), Error> {
    let certs = load_certs(cert_pem.as_ref())?;
    let private_key = load_private_key(key_pem.as_ref())?;

    let signing_key = sign::any_supported_type(&private_key).context(NoSupportedSignTypeSnafu)?;

    let certified_key = CertifiedKey::new(certs, signing_key);
    certified_key.keys_match().context(MatchFailedSnafu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, KeyPair};

    fn self_signed(key: &KeyPair) -> String {
        CertificateParams::new(vec!["observability.test".to_string()])
            .unwrap()
            .self_signed(key)
            .unwrap()
            .pem()
    }

    #[test]
    fn test_x509_key_pair_matches_generated_ecdsa() {
        let key = KeyPair::generate().unwrap();
        let cert = self_signed(&key);

        assert!(matches!(
            load_private_key(key.serialize_pem().as_bytes()),
            Ok(PrivateKeyDer::Pkcs8(_))
        ));
        assert!(x509_key_pair(cert, key.serialize_pem()).is_ok());
    }

    #[test]
    fn test_x509_key_pair_matches_generated_rsa() {
        let key = KeyPair::generate_rsa_for(&rcgen::PKCS_RSA_SHA256, rcgen::RsaKeySize::_2048)
            .unwrap();
        let cert = self_signed(&key);

        assert!(x509_key_pair(cert, key.serialize_pem()).is_ok());
    }

    #[test]
    fn test_x509_key_pair_rejects_foreign_key() {
        let key = KeyPair::generate().unwrap();
        let other = KeyPair::generate().unwrap();
        let cert = self_signed(&key);

        assert!(matches!(
            x509_key_pair(cert, other.serialize_pem()),
            Err(Error::MatchFailed { .. })
        ));
    }

    #[test]
    fn test_x509_key_pair_rejects_missing_material() {
        let key = KeyPair::generate().unwrap();
        assert!(matches!(
            x509_key_pair(String::new(), key.serialize_pem()),
            Err(Error::NonCertificate)
        ));

        let cert = self_signed(&key);
        assert!(matches!(
            x509_key_pair(cert, String::new()),
            Err(Error::NonPrivateKey)
        ));
    }
}
