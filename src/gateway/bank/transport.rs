//! SOAP transport for the bank's single `BCCExecute` operation

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::BankError;
use super::document::{SERVICE_NAMESPACE, tag_text};
use crate::config::BankConfig;

/// The `return` element of a `BCCExecute` response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteReply {
    /// Envelope-level result code, `0` on success
    pub cod_error: String,
    pub des_error: String,
    /// Sealed reply document
    pub output_xml: String,
}

impl ExecuteReply {
    pub fn parse(body: &str) -> Result<Self, BankError> {
        let cod_error = tag_text(body, "codError")
            .ok_or_else(|| BankError::Protocol("reply has no codError".to_string()))?;
        Ok(Self {
            cod_error,
            des_error: tag_text(body, "desError").unwrap_or_default(),
            output_xml: tag_text(body, "outputXML").unwrap_or_default(),
        })
    }
}

#[async_trait]
pub trait SoapTransport: Send + Sync {
    /// Post one `BCCExecute` body and return its reply
    async fn execute(&self, body: &str) -> Result<ExecuteReply, BankError>;
}

pub struct HttpSoapTransport {
    url: String,
    soap_action: String,
    user: String,
    password: String,
    client: reqwest::Client,
}

impl HttpSoapTransport {
    pub fn new(config: &BankConfig) -> Result<Self, BankError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| BankError::Transport(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            url: config.url.clone(),
            soap_action: config
                .soap_action
                .clone()
                .unwrap_or_else(|| format!("{}BCCExecute", SERVICE_NAMESPACE)),
            user: config.user.clone(),
            password: config.password.clone(),
            client,
        })
    }
}

fn soap_envelope(body: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/">"#,
            "<soapenv:Header/><soapenv:Body>{}</soapenv:Body></soapenv:Envelope>"
        ),
        body
    )
}

#[async_trait]
impl SoapTransport for HttpSoapTransport {
    async fn execute(&self, body: &str) -> Result<ExecuteReply, BankError> {
        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", &self.soap_action)
            .body(soap_envelope(body))
            .send()
            .await
            .map_err(|e| BankError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BankError::Transport(e.to_string()))?;
        debug!(status = %status, bytes = text.len(), "BCCExecute reply");

        if !status.is_success() {
            let fault = tag_text(&text, "faultstring").unwrap_or_else(|| status.to_string());
            return Err(BankError::Transport(format!("HTTP {}: {}", status.as_u16(), fault)));
        }
        ExecuteReply::parse(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reply() {
        let body = r#"<S:Envelope><S:Body><ns2:BCCExecuteResponse><return>
            <codError>0</codError><desError></desError><entity>0123</entity>
            <idTxBCC>5</idTxBCC><outputXML>QUJD</outputXML>
            </return></ns2:BCCExecuteResponse></S:Body></S:Envelope>"#;
        let reply = ExecuteReply::parse(body).unwrap();
        assert_eq!(reply.cod_error, "0");
        assert_eq!(reply.des_error, "");
        assert_eq!(reply.output_xml, "QUJD");
    }

    #[test]
    fn test_parse_reply_without_code() {
        assert!(matches!(
            ExecuteReply::parse("<html>gateway timeout</html>"),
            Err(BankError::Protocol(_))
        ));
    }

    #[test]
    fn test_soap_envelope_wraps_body() {
        let env = soap_envelope("<bcc:BCCExecute/>");
        assert!(env.contains("<soapenv:Body><bcc:BCCExecute/></soapenv:Body>"));
    }
}
