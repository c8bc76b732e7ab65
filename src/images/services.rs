use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use uuid::Uuid;

use crate::storage::StorageClient;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub struct UploadItem {
    pub body: Bytes,
    pub content_type: String,
}

/// Decodes `data:<mime>;base64,<payload>` or a bare base64 payload.
pub fn decode_encoded_image(encoded: &str) -> anyhow::Result<UploadItem> {
    let encoded = encoded.trim();
    let (content_type, payload) = match encoded.strip_prefix("data:") {
        Some(rest) => {
            let (meta, payload) = rest.split_once(',').context("data uri without payload")?;
            let mime = meta
                .strip_suffix(";base64")
                .context("data uri is not base64 encoded")?;
            let mime = if mime.is_empty() { DEFAULT_CONTENT_TYPE } else { mime };
            (mime.to_string(), payload)
        }
        None => (DEFAULT_CONTENT_TYPE.to_string(), encoded),
    };

    let body = STANDARD.decode(payload).context("invalid base64 image")?;
    anyhow::ensure!(!body.is_empty(), "empty image");
    Ok(UploadItem {
        body: Bytes::from(body),
        content_type,
    })
}

/// Stores the image under the user's prefix and returns its public URL.
pub async fn upload_profile_picture(
    storage: &dyn StorageClient,
    user_id: Uuid,
    encoded: &str,
) -> anyhow::Result<String> {
    let img = decode_encoded_image(encoded)?;
    let ext = ext_from_mime(&img.content_type).unwrap_or("bin");
    let key = format!("avatars/{}/{}.{}", user_id, Uuid::new_v4(), ext);
    storage
        .put_object(&key, img.body, &img.content_type)
        .await
        .with_context(|| format!("put_object {}", key))?;
    Ok(storage.public_url(&key))
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}


#[cfg(test)]
mod image_tests {
    use super::fake::FakeStorage;
    use super::*;

    #[test]
    fn test_ext_from_mime() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("image/webp"), Some("webp"));
        assert_eq!(ext_from_mime("image/gif"), Some("gif"));
        assert_eq!(ext_from_mime("application/octet-stream"), None);
    }

    #[test]
    fn decodes_data_uri_and_bare_base64() {
        let img = decode_encoded_image("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(img.content_type, "image/png");
        assert_eq!(&img.body[..], b"hello");

        let img = decode_encoded_image("aGVsbG8=").unwrap();
        assert_eq!(img.content_type, DEFAULT_CONTENT_TYPE);
        assert_eq!(&img.body[..], b"hello");
    }

    #[test]
    fn rejects_malformed_images() {
        assert!(decode_encoded_image("data:image/png,aGVsbG8=").is_err());
        assert!(decode_encoded_image("data:image/png;base64").is_err());
        assert!(decode_encoded_image("!!!not base64!!!").is_err());
        assert!(decode_encoded_image("").is_err());
    }

    #[tokio::test]
    async fn upload_stores_object_under_user_prefix() {
        let storage = FakeStorage::default();
        let user_id = Uuid::new_v4();
        let url = upload_profile_picture(&storage, user_id, "data:image/jpeg;base64,aGVsbG8=")
            .await
            .unwrap();

        let objects = storage.objects.lock().unwrap();
        assert_eq!(objects.len(), 1);
        let (key, body, ct) = &objects[0];
        assert!(key.starts_with(&format!("avatars/{}/", user_id)));
        assert!(key.ends_with(".jpg"));
        assert_eq!(&body[..], b"hello");
        assert_eq!(ct, "image/jpeg");
        assert_eq!(url, format!("https://fake.local/{}", key));
    }
}
