//! Stripe payment intents over plain HTTP.
//!
//! Requests are form-encoded with amounts in minor units and lowercase
//! currency codes. Every mutating call carries an `Idempotency-Key` so a
//! retried request never charges twice.

use async_trait::async_trait;
use larder_core::{PaymentStatus, to_minor_units};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{
    GatewayError, GatewayIntent, GatewayRefund, IntentRequest, OffSessionCharge, PaymentGateway,
    RefundRequest,
};
use crate::config::StripeConfig;

/// Stripe API client.
#[derive(Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    api_base: String,
}

impl std::fmt::Debug for StripeGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeGateway")
            .field("api_base", &self.api_base)
            .field("secret_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl StripeGateway {
    /// Create a client authenticated with the secret key.
    ///
    /// # Errors
    ///
    /// Returns error if the key is not a valid header value or the HTTP
    /// client fails to build.
    pub fn new(config: &StripeConfig) -> Result<Self, GatewayError> {
        let mut headers = HeaderMap::new();
        let auth_value = format!("Bearer {}", config.secret_key.expose_secret());
        let mut auth = HeaderValue::from_str(&auth_value)
            .map_err(|e| GatewayError::Parse(format!("Invalid API key format: {e}")))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        idempotency_key: &str,
        form: &[(&str, String)],
    ) -> Result<Result<T, StripeErrorBody>, GatewayError> {
        let response = self
            .client
            .post(format!("{}{path}", self.api_base))
            .header("Idempotency-Key", idempotency_key)
            .form(form)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            let parsed =
                serde_json::from_str(&body).map_err(|e| GatewayError::Parse(e.to_string()))?;
            return Ok(Ok(parsed));
        }

        // Card errors come back as 402 with the failed intent attached.
        if status.as_u16() == 402
            && let Ok(envelope) = serde_json::from_str::<StripeErrorEnvelope>(&body)
        {
            return Ok(Err(envelope.error));
        }

        let message = serde_json::from_str::<StripeErrorEnvelope>(&body)
            .ok()
            .and_then(|e| e.error.message)
            .unwrap_or(body);
        Err(GatewayError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

fn minor_units(amount: Decimal) -> Result<String, GatewayError> {
    to_minor_units(amount)
        .filter(|minor| *minor >= 0)
        .map(|minor| minor.to_string())
        .ok_or(GatewayError::InvalidAmount(amount))
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_intent(&self, request: &IntentRequest) -> Result<GatewayIntent, GatewayError> {
        let mut form = vec![
            ("amount", minor_units(request.amount)?),
            ("currency", request.currency.gateway_code().to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
            ("metadata[order_id]", request.order_id.to_string()),
        ];
        if let Some(customer) = &request.customer_ref {
            form.push(("customer", customer.clone()));
            form.push(("setup_future_usage", "off_session".to_string()));
        }

        match self
            .post::<StripeIntent>("/v1/payment_intents", &request.idempotency_key, &form)
            .await?
        {
            Ok(intent) => {
                debug!(gateway_id = %intent.id, "Payment intent created");
                Ok(intent.into())
            }
            Err(card_error) => Err(GatewayError::Declined(card_error.describe())),
        }
    }

    #[instrument(skip(self, charge), fields(order_id = %charge.order_id))]
    async fn charge_off_session(
        &self,
        charge: &OffSessionCharge,
    ) -> Result<GatewayIntent, GatewayError> {
        let mut form = vec![
            ("amount", minor_units(charge.amount)?),
            ("currency", charge.currency.gateway_code().to_string()),
            ("payment_method", charge.payment_method_ref.clone()),
            ("off_session", "true".to_string()),
            ("confirm", "true".to_string()),
            ("metadata[order_id]", charge.order_id.to_string()),
        ];
        if let Some(customer) = &charge.customer_ref {
            form.push(("customer", customer.clone()));
        }

        match self
            .post::<StripeIntent>("/v1/payment_intents", &charge.idempotency_key, &form)
            .await?
        {
            Ok(intent) => Ok(intent.into()),
            Err(card_error) => {
                let reason = card_error.describe();
                let Some(intent) = card_error.payment_intent else {
                    return Err(GatewayError::Declined(reason));
                };
                Ok(GatewayIntent {
                    id: intent.id,
                    client_secret: None,
                    status: PaymentStatus::Failed,
                    last_error: Some(reason),
                })
            }
        }
    }

    #[instrument(skip(self, request), fields(gateway_id = %request.gateway_intent_id))]
    async fn refund(&self, request: &RefundRequest) -> Result<GatewayRefund, GatewayError> {
        let form = vec![
            ("payment_intent", request.gateway_intent_id.clone()),
            ("amount", minor_units(request.amount)?),
        ];

        match self
            .post::<StripeRefund>("/v1/refunds", &request.idempotency_key, &form)
            .await?
        {
            Ok(refund) => Ok(GatewayRefund {
                id: refund.id,
                status: refund.status,
            }),
            Err(card_error) => Err(GatewayError::Declined(card_error.describe())),
        }
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
struct StripeIntent {
    id: String,
    client_secret: Option<String>,
    status: String,
    last_payment_error: Option<StripeErrorBody>,
}

impl From<StripeIntent> for GatewayIntent {
    fn from(intent: StripeIntent) -> Self {
        Self {
            id: intent.id,
            client_secret: intent.client_secret,
            status: PaymentStatus::from_gateway(&intent.status),
            last_error: intent.last_payment_error.map(|e| e.describe()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StripeRefund {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    code: Option<String>,
    decline_code: Option<String>,
    message: Option<String>,
    payment_intent: Option<StripeIntentRef>,
}

impl StripeErrorBody {
    fn describe(&self) -> String {
        self.decline_code
            .as_deref()
            .or(self.code.as_deref())
            .or(self.message.as_deref())
            .unwrap_or("payment_failed")
            .to_string()
    }
}

#[derive(Debug, Deserialize)]
struct StripeIntentRef {
    id: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_minor_units_rejects_negative() {
        assert_eq!(minor_units(Decimal::new(1999, 2)).unwrap(), "1999");
        assert!(matches!(
            minor_units(Decimal::new(-100, 2)),
            Err(GatewayError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_intent_status_mapping() {
        let intent: StripeIntent = serde_json::from_str(
            r#"{"id":"pi_1","client_secret":"pi_1_secret_x","status":"requires_payment_method",
                "last_payment_error":null}"#,
        )
        .unwrap();
        let intent: GatewayIntent = intent.into();
        assert_eq!(intent.status, PaymentStatus::RequiresPaymentMethod);
        assert_eq!(intent.client_secret.as_deref(), Some("pi_1_secret_x"));
    }

    #[test]
    fn test_card_error_prefers_decline_code() {
        let envelope: StripeErrorEnvelope = serde_json::from_str(
            r#"{"error":{"type":"card_error","code":"card_declined",
                "decline_code":"insufficient_funds","message":"Your card has insufficient funds.",
                "payment_intent":{"id":"pi_2","status":"requires_payment_method"}}}"#,
        )
        .unwrap();
        assert_eq!(envelope.error.describe(), "insufficient_funds");
        assert_eq!(envelope.error.payment_intent.unwrap().id, "pi_2");
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = StripeConfig {
            api_base: "https://api.stripe.com/".to_string(),
            secret_key: "sk_test_4eC39HqLyjWDarjtT1zdp7dc".to_string().into(),
            webhook_secret: "whsec_9f8a7b6c5d4e3f2a1b0c".to_string().into(),
        };
        let gateway = StripeGateway::new(&config).unwrap();
        let debug = format!("{gateway:?}");
        assert!(!debug.contains("sk_test"));
        assert!(debug.contains("https://api.stripe.com\""));
    }
}
