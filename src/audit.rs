/// Emits an audit event tagged with the current request.
///
/// Events default to `audit_type = "authentication"`; pass `kind: "..."`
/// first to log another type. The request id, endpoint, host and method
/// come from [`crate::middleware::with_request_info`].
///
/// ```ignore
/// audit!(outcome = "rejected", reason = "expired", "Identity token rejected");
/// audit!(kind: "access", status = 200u16, "request finished");
/// ```
#[macro_export]
macro_rules! audit {
    (kind: $kind:expr, $($arg:tt)+) => {
        $crate::middleware::with_request_info(|ctx| {
            tracing::info!(
                audit = true,
                audit_type = $kind,
                request_id = %ctx.request_id,
                endpoint = %ctx.endpoint,
                host = %ctx.host,
                http_method = %ctx.method,
                $($arg)+
            )
        })
    };
    ($($arg:tt)+) => {
        $crate::audit!(kind: "authentication", $($arg)+)
    };
}
