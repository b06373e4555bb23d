use crate::{models::Envelope, Error, HttpClient};
use bytes::Bytes;
use flate2::{write::GzEncoder, Compression};
use http::{Request, Response, Uri};
use std::io::Write;

const STATUS_OK: u16 = 200;

/// Sends a batch of telemetry items to the collector as one JSON array.
pub(crate) async fn send<C: HttpClient + ?Sized>(
    client: &C,
    endpoint: &Uri,
    items: &[Envelope],
    gzip: bool,
) -> Result<(), Error> {
    let payload = serialize_request_body(items, gzip)?;

    let mut request_builder = Request::post(endpoint)
        .header(http::header::ACCEPT, "application/json")
        .header(
            http::header::CONTENT_TYPE,
            "application/json; charset=utf-8",
        );
    if gzip {
        request_builder = request_builder.header(http::header::CONTENT_ENCODING, "gzip");
    }
    let request = request_builder
        .body(Bytes::from(payload))
        .map_err(|err| Error::UploadConnection(err.into()))?;

    let response = client
        .send_bytes(request)
        .await
        .map_err(Error::UploadConnection)?;
    handle_response(response)
}

pub(crate) fn serialize_request_body(items: &[Envelope], gzip: bool) -> Result<Vec<u8>, Error> {
    let serialized = serde_json::to_vec(items).map_err(Error::UploadSerializeRequest)?;
    if !gzip {
        return Ok(serialized);
    }

    let mut gzip_encoder = GzEncoder::new(Vec::new(), Compression::default());
    gzip_encoder
        .write_all(&serialized)
        .map_err(Error::UploadCompressRequest)?;
    gzip_encoder.finish().map_err(Error::UploadCompressRequest)
}

fn handle_response(response: Response<Bytes>) -> Result<(), Error> {
    match response.status().as_u16() {
        STATUS_OK => Ok(()),
        status => Err(Error::TransmissionFailed {
            status,
            body: String::from_utf8_lossy(response.body()).into_owned(),
        }),
    }
}
