use tonic::{Request, Status};
use x509_parser::prelude::{FromDer, X509Certificate};

/// Caller identity derived from the verified client certificate, installed
/// into the request extensions for the service handlers.
#[derive(Clone, Debug)]
pub struct UserExtension {
    pub user_id: String,
}

/// A tonic interceptor service function.
///
/// Extracts the subject common name from the client certificate and adds it
/// to the request extensions. The TLS layer has already verified the
/// certificate against the configured CA by the time this runs.
pub fn extract_user(mut req: Request<()>) -> Result<Request<()>, Status> {
    let certs = req
        .peer_certs()
        .ok_or_else(|| Status::unauthenticated("request missing client cert"))?;
    let Some(cert) = certs.first() else {
        return Err(Status::unauthenticated("request missing client cert"));
    };

    let (_, cert) = X509Certificate::from_der(cert.as_ref())
        .map_err(|_| Status::unauthenticated("bad client cert"))?;

    let user_id = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .ok_or_else(|| Status::unauthenticated("client cert missing subject common name"))?
        .to_string();

    if user_id.is_empty() {
        return Err(Status::unauthenticated("client cert subject is empty"));
    }

    req.extensions_mut().insert(UserExtension { user_id });
    Ok(req)
}
