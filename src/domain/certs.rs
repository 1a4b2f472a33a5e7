use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// TLS material the broker uses to reach one agent's docker API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerCerts {
    #[serde(rename = "Host", alias = "host", default)]
    pub host: String,
    #[serde(rename = "ClientCert", alias = "client_cert", with = "base64_bytes", default)]
    pub client_cert: Vec<u8>,
    #[serde(rename = "ClientKey", alias = "client_key", with = "base64_bytes", default)]
    pub client_key: Vec<u8>,
    #[serde(rename = "CA", alias = "ca", with = "base64_bytes", default)]
    pub ca: Vec<u8>,
}

impl BrokerCerts {
    pub fn has_identity(&self) -> bool {
        !self.client_cert.is_empty() || !self.client_key.is_empty()
    }

    /// Replace the PEM bytes by their lengths so listings never leak keys.
    pub fn masked(&self) -> Self {
        Self {
            host: self.host.clone(),
            client_cert: self.client_cert.len().to_string().into_bytes(),
            client_key: self.client_key.len().to_string().into_bytes(),
            ca: self.ca.len().to_string().into_bytes(),
        }
    }
}

mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64_STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        BASE64_STANDARD
            .decode(raw.trim())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_reports_lengths() {
        let certs = BrokerCerts {
            host: "agent-1".to_string(),
            client_cert: b"-----BEGIN CERTIFICATE-----".to_vec(),
            client_key: Vec::new(),
            ca: b"abc".to_vec(),
        };
        let masked = certs.masked();
        assert_eq!(masked.client_cert, b"27".to_vec());
        assert_eq!(masked.client_key, b"0".to_vec());
        assert_eq!(masked.ca, b"3".to_vec());
        assert!(certs.has_identity());
        assert!(!BrokerCerts::default().has_identity());
    }

    #[test]
    fn test_bytes_travel_as_base64() {
        let certs = BrokerCerts {
            host: "agent-1".to_string(),
            client_cert: b"cert".to_vec(),
            client_key: b"key".to_vec(),
            ca: Vec::new(),
        };
        let value = serde_json::to_value(&certs).unwrap();
        assert_eq!(value["ClientCert"], "Y2VydA==");

        let back: BrokerCerts = serde_json::from_value(value).unwrap();
        assert_eq!(back, certs);
    }

    #[test]
    fn test_null_bytes_decode_empty() {
        let certs: BrokerCerts =
            serde_json::from_str(r#"{"Host":"h","ClientCert":null}"#).unwrap();
        assert!(certs.client_cert.is_empty());
    }
}
