use actix_web::{web, HttpResponse};
use mongodb::bson::{doc, DateTime};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::bookings::modify_booking;
use crate::auth::{AdminUser, AuthUser};
use crate::config::MongoConfig;
use crate::error::{parse_id, ApiError, ApiResult};
use crate::gateways::{razorpay::to_minor_units, Razorpay};
use crate::models::Booking;
use crate::notifier::Notifier;

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub amount: f64,
    pub currency: Option<String>,
    pub receipt: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub payment_id: String,
    #[serde(default)]
    pub signature: String,
    pub booking_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    pub count: Option<u32>,
    pub skip: Option<u32>,
}

const MAX_PAGE: u32 = 100;

fn receipt_or_default(receipt: Option<&str>, now: DateTime) -> String {
    receipt
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("receipt_{}", now.timestamp_millis()))
}

pub async fn create_order(
    user: AuthUser,
    razorpay: web::Data<Razorpay>,
    body: web::Json<CreateOrderRequest>,
) -> ApiResult<HttpResponse> {
    if body.amount.is_nan() || body.amount <= 0.0 {
        return Err(ApiError::InvalidArgument("Amount must be greater than 0".into()));
    }
    let currency = body.currency.as_deref().unwrap_or("INR");
    let receipt = receipt_or_default(body.receipt.as_deref(), DateTime::now());

    debug!("Creating payment order for {}: {} {}", user.id, body.amount, currency);

    let order = razorpay
        .create_order(to_minor_units(body.amount), currency, &receipt)
        .await?;

    info!("Payment order {} created for {}", order.id, user.id);
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "orderId": order.id,
        "keyId": razorpay.key_id(),
        "amount": order.amount,
        "currency": order.currency,
    })))
}

fn ensure_signature(razorpay: &Razorpay, request: &VerifyPaymentRequest) -> ApiResult<()> {
    if razorpay.verify_signature(&request.order_id, &request.payment_id, &request.signature) {
        Ok(())
    } else {
        Err(ApiError::SignatureMismatch)
    }
}

/// Marks the booking paid with the gateway ids, only for a valid signature.
fn settle_payment(
    razorpay: &Razorpay,
    request: &VerifyPaymentRequest,
    booking: &mut Booking,
) -> ApiResult<()> {
    ensure_signature(razorpay, request)?;
    booking.mark_paid(&request.order_id, &request.payment_id);
    Ok(())
}

pub async fn verify_payment(
    user: AuthUser,
    db: web::Data<MongoConfig>,
    razorpay: web::Data<Razorpay>,
    notifier: web::Data<Notifier>,
    body: web::Json<VerifyPaymentRequest>,
) -> ApiResult<HttpResponse> {
    if body.order_id.is_empty() || body.payment_id.is_empty() || body.signature.is_empty() {
        return Err(ApiError::InvalidArgument(
            "orderId, paymentId and signature are required".into(),
        ));
    }
    let booking_id = body
        .booking_id
        .as_deref()
        .map(|raw| parse_id(raw, "booking"))
        .transpose()?;

    debug!("Verifying payment {} for order {}", body.payment_id, body.order_id);

    if let Err(e) = ensure_signature(&razorpay, &body) {
        warn!("Signature mismatch for order {} from {}", body.order_id, user.id);
        return Err(e);
    }

    let Some(booking_id) = booking_id else {
        info!("Payment {} verified without a booking", body.payment_id);
        return Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "message": "Payment verified successfully",
        })));
    };

    let booking = modify_booking(&db, booking_id, doc! { "user": user.id }, |booking| {
        settle_payment(&razorpay, &body, booking)
    })
    .await?;

    info!("Booking {} paid with {}", booking_id, body.payment_id);
    notifier
        .booking(
            &booking,
            "Payment Successful",
            &format!("We received your payment of ₹{:.2}.", booking.amount),
        )
        .await;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Payment verified successfully",
        "booking": booking,
    })))
}

pub async fn transactions(
    _admin: AdminUser,
    razorpay: web::Data<Razorpay>,
    query: web::Query<TransactionsQuery>,
) -> ApiResult<HttpResponse> {
    let count = query.count.unwrap_or(10).clamp(1, MAX_PAGE);
    let skip = query.skip.unwrap_or(0);
    debug!("Fetching gateway payments (count {}, skip {})", count, skip);

    let payments = razorpay.list_payments(count, skip).await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "count": payments.count,
        "items": payments.items,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::razorpay::payment_signature;
    use crate::models::{fixtures, PaymentMethod, PaymentStatus};

    fn verify_request(signature: &str) -> VerifyPaymentRequest {
        VerifyPaymentRequest {
            order_id: "order_1".into(),
            payment_id: "pay_1".into(),
            signature: signature.into(),
            booking_id: None,
        }
    }

    #[test]
    fn receipt_defaults_to_timestamp() {
        let now = DateTime::from_millis(1_700_000_000_123);
        assert_eq!(receipt_or_default(None, now), "receipt_1700000000123");
        assert_eq!(receipt_or_default(Some("  "), now), "receipt_1700000000123");
        assert_eq!(receipt_or_default(Some("rcpt-42"), now), "rcpt-42");
    }

    #[test]
    fn verify_request_tolerates_missing_fields() {
        let body: VerifyPaymentRequest = serde_json::from_str(r#"{"orderId":"order_1"}"#).unwrap();
        assert_eq!(body.order_id, "order_1");
        assert!(body.payment_id.is_empty());
        assert!(body.booking_id.is_none());
    }

    #[test]
    fn valid_signature_marks_booking_paid() {
        let razorpay = Razorpay::with_keys("rzp_test", "rzp_secret");
        let request = verify_request(&payment_signature("rzp_secret", "order_1", "pay_1"));
        let mut booking = fixtures::booking(PaymentMethod::Cod);

        settle_payment(&razorpay, &request, &mut booking).unwrap();
        assert_eq!(booking.payment_status, PaymentStatus::Paid);
        assert_eq!(booking.payment_method, PaymentMethod::Online);
        assert_eq!(booking.razorpay_order_id.as_deref(), Some("order_1"));
        assert_eq!(booking.razorpay_payment_id.as_deref(), Some("pay_1"));
    }

    #[test]
    fn wrong_signature_leaves_booking_untouched() {
        let razorpay = Razorpay::with_keys("rzp_test", "rzp_secret");
        let mut booking = fixtures::booking(PaymentMethod::Online);
        let before = booking.clone();

        let valid = payment_signature("rzp_secret", "order_1", "pay_1");
        for signature in ["abc".to_string(), valid.to_uppercase(), format!(" {}", valid)] {
            let err = settle_payment(&razorpay, &verify_request(&signature), &mut booking)
                .unwrap_err();
            assert!(matches!(err, ApiError::SignatureMismatch));
        }
        assert_eq!(booking.payment_status, PaymentStatus::Pending);
        assert_eq!(booking.razorpay_payment_id, None);
        assert_eq!(booking.updated_at, before.updated_at);
    }
}
