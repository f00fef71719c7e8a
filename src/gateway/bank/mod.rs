//! Legacy Bank Gateway
//!
//! Settles against the bank's back-office through one encrypted SOAP
//! operation (`BCCExecute`); the product code picks account lookup, balance,
//! transfer or status check. The bridge holds a virtual account at the bank:
//! outbound flows pay from it, inbound flows collect into it.
//!
//! The bank deduplicates transfers on `IDTXENTIDAD`, which carries the
//! idempotency key, and reports status under the same key.

pub mod codec;
pub mod directory;
pub mod document;
pub mod transport;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{Destination, Flow, Gateway, GatewayFailure, GatewayResult, PaymentOrder};
use crate::config::{BankConfig, ProductCodes};
use crate::money;
use crate::settlement::classifier::{Classification, ErrorClassifier, TRANSPORT_FAULT};
use crate::settlement::{IdempotencyKey, SettlementError};
use codec::{CodecError, Framing, LegacyCipher};
use document::{AccountParty, TransferDocument, tag_text};

pub use directory::{BusinessDirectory, BusinessProfile};
pub use transport::{ExecuteReply, HttpSoapTransport, SoapTransport};

/// Transfer status code of an applied transaction
const STATUS_APPLIED: &str = "A";

#[derive(Debug, Error)]
pub enum BankError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("malformed reply: {0}")]
    Protocol(String),

    #[error("bank error [{code}] {message}")]
    Remote { code: String, message: String },
}

pub struct BankGateway {
    symbol: String,
    entity: String,
    user: String,
    password: String,
    operation_origin: String,
    virtual_account: AccountParty,
    decimals: u32,
    products: ProductCodes,
    verify_accounts: bool,
    cipher: LegacyCipher,
    classifier: ErrorClassifier,
    directory: BusinessDirectory,
    transport: Arc<dyn SoapTransport>,
}

impl BankGateway {
    pub fn new(
        config: &BankConfig,
        classifier: ErrorClassifier,
        transport: Arc<dyn SoapTransport>,
    ) -> Result<Self, BankError> {
        let cipher = LegacyCipher::from_halves(&config.key1, &config.key2)?;
        let directory = BusinessDirectory::from_config(&config.businesses);
        info!(
            symbol = %config.symbol,
            entity = %config.entity,
            businesses = directory.len(),
            "Bank gateway ready"
        );
        Ok(Self {
            symbol: config.symbol.to_ascii_lowercase(),
            entity: config.entity.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            operation_origin: config.operation_origin.clone(),
            virtual_account: AccountParty {
                account: config.virtual_account.clone(),
                document: config.source_document.clone(),
                name: config.source_name.clone(),
            },
            decimals: config.decimals,
            products: config.products.clone(),
            verify_accounts: config.verify_accounts,
            cipher,
            classifier,
            directory,
            transport,
        })
    }

    // ============================================================
    // WIRE
    // ============================================================

    /// Seal `document`, run `product`, return the opened reply document.
    /// Envelope-level failures come back as [`BankError::Remote`].
    async fn execute(&self, product: u32, document: &str) -> Result<String, BankError> {
        let envelope = document::envelope(
            &self.entity,
            &self.cipher.seal(document)?,
            &self.cipher.seal(&self.password)?,
            product,
            &self.user,
        );
        let reply = self.transport.execute(&envelope).await?;
        if !self.classifier.is_success(&reply.cod_error) {
            return Err(BankError::Remote {
                code: reply.cod_error,
                message: reply.des_error,
            });
        }
        let output = self.cipher.open(&reply.output_xml, Framing::Document)?;
        Ok(document::strip_prolog(&output).to_string())
    }

    /// `DETALLE` result code and description of a reply document
    fn detail_result(output: &str) -> (String, String) {
        (
            tag_text(output, "CODERROR").unwrap_or_default(),
            tag_text(output, "DESCRIPERROR").unwrap_or_default(),
        )
    }

    fn ensure_success(&self, output: &str) -> Result<(), BankError> {
        let (code, message) = Self::detail_result(output);
        if self.classifier.is_success(&code) {
            Ok(())
        } else {
            Err(BankError::Remote { code, message })
        }
    }

    fn failure(&self, error: &BankError) -> GatewayFailure {
        match error {
            BankError::Remote { code, message } => {
                GatewayFailure::classified(&self.classifier, code, message)
            }
            other => GatewayFailure::classified(&self.classifier, TRANSPORT_FAULT, &other.to_string()),
        }
    }

    fn settlement_error(&self, error: BankError) -> SettlementError {
        match error {
            BankError::Remote { code, message }
                if self.classifier.classify(&code, &message) == Classification::Fatal =>
            {
                SettlementError::ExternalUnknown { code, message }
            }
            other => SettlementError::GatewayUnavailable(other.to_string()),
        }
    }

    fn transfer_document(
        &self,
        order: &PaymentOrder,
        profile: &BusinessProfile,
        key: &IdempotencyKey,
    ) -> Result<TransferDocument, money::MoneyError> {
        let business = AccountParty {
            account: profile.account.clone(),
            document: profile.document.clone(),
            name: profile.name.clone(),
        };
        let (source, target) = match order.flow {
            Flow::Outbound => (self.virtual_account.clone(), business),
            Flow::Inbound => (business, self.virtual_account.clone()),
        };
        Ok(TransferDocument {
            origin_operation: self.operation_origin.clone(),
            source,
            target,
            description: order.memo.clone(),
            unscaled_amount: money::to_unscaled(order.amount, self.decimals)?,
            external_id: key.as_str().to_string(),
        })
    }
}

#[async_trait]
impl Gateway for BankGateway {
    fn rail(&self) -> &str {
        &self.symbol
    }

    fn can_pull(&self) -> bool {
        true
    }

    async fn validate_destination(&self, identifier: &str) -> Result<Destination, SettlementError> {
        let profile = self.directory.resolve(identifier).cloned().ok_or_else(|| {
            SettlementError::InvalidDestination(format!("{} is not a registered business", identifier))
        })?;

        if self.verify_accounts {
            let lookup = document::account_check(
                &self.entity,
                &profile.account,
                &profile.document_type,
                &profile.document,
            );
            let verified = match self.execute(self.products.account_lookup, &lookup).await {
                Ok(output) => self.ensure_success(&output),
                Err(e) => Err(e),
            };
            match verified.map_err(|e| self.settlement_error(e)) {
                Ok(()) => {}
                Err(SettlementError::ExternalUnknown { code, message }) => {
                    return Err(SettlementError::InvalidDestination(format!(
                        "account {} of {} rejected: [{}] {}",
                        profile.account, profile.handle, code, message
                    )));
                }
                Err(e) => return Err(e),
            }
            debug!(
                business = %profile.handle,
                document = %profile.document,
                document_type = profile.document_label(),
                "Bank account verified"
            );
        }
        Ok(Destination::BankAccount(profile))
    }

    async fn check_available_balance(&self) -> Result<Decimal, SettlementError> {
        let query = document::balance_check(&self.entity, &self.virtual_account.account);
        let output = match self.execute(self.products.balance, &query).await {
            Ok(output) => output,
            Err(e) => return Err(self.settlement_error(e)),
        };
        self.ensure_success(&output)
            .map_err(|e| self.settlement_error(e))?;

        let available = tag_text(&output, "SALDODISP").ok_or_else(|| SettlementError::ExternalUnknown {
            code: "protocol".to_string(),
            message: "balance reply has no SALDODISP".to_string(),
        })?;
        Decimal::from_str(&available).map_err(|e| SettlementError::ExternalUnknown {
            code: "protocol".to_string(),
            message: format!("SALDODISP {}: {}", available, e),
        })
    }

    async fn submit_payment(&self, order: &PaymentOrder, key: &IdempotencyKey) -> GatewayResult {
        let Destination::BankAccount(profile) = &order.destination else {
            return GatewayResult::Failed(GatewayFailure::fatal(
                "invalid-destination",
                "bank payment needs a business account",
            ));
        };
        let transfer = match self.transfer_document(order, profile, key) {
            Ok(transfer) => transfer,
            Err(e) => return GatewayResult::Failed(GatewayFailure::fatal("invalid-amount", e.to_string())),
        };

        let request = document::create_transaction(&self.entity, &transfer);
        let output = match self.execute(self.products.submit, &request).await {
            Ok(output) => output,
            Err(e) => {
                warn!(key = %key, error = %e, "Bank transfer call failed");
                return GatewayResult::Failed(self.failure(&e));
            }
        };

        let (code, message) = Self::detail_result(&output);
        if self.classifier.is_success(&code) {
            let reference = tag_text(&output, "IDTX")
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| key.to_string());
            info!(
                key = %key,
                reference = %reference,
                flow = ?order.flow,
                amount = %order.amount,
                business = %profile.handle,
                "Bank transfer applied"
            );
            return GatewayResult::Settled(reference);
        }

        let failure = GatewayFailure::classified(&self.classifier, &code, &message);
        if failure.classification == Classification::Pending {
            info!(key = %key, code = %code, "Bank transfer pending");
            GatewayResult::StillPending
        } else {
            GatewayResult::Failed(failure)
        }
    }

    async fn query_status(&self, reference: &str) -> GatewayResult {
        let request = document::transaction_status(&self.entity, reference);
        let output = match self.execute(self.products.status, &request).await {
            Ok(output) => output,
            Err(e) => return GatewayResult::Failed(self.failure(&e)),
        };

        let status = tag_text(&output, "ESTADOTX").unwrap_or_default();
        if status == STATUS_APPLIED {
            let settled = tag_text(&output, "IDTXAPL")
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| reference.to_string());
            return GatewayResult::Settled(settled);
        }

        let (code, message) = Self::detail_result(&output);
        if self.classifier.is_success(&code) {
            return GatewayResult::Failed(GatewayFailure::unsettled(
                format!("status-{}", status),
                format!("transaction {} in state {:?} {}", reference, status, message),
            ));
        }
        let failure = GatewayFailure::classified(&self.classifier, &code, &message);
        if failure.classification == Classification::Pending {
            GatewayResult::StillPending
        } else {
            GatewayResult::Failed(failure)
        }
    }
}
