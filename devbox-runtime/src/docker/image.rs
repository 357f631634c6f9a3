use bollard::query_parameters::CreateImageOptions;
use futures_util::StreamExt;
use tracing::{debug, info, instrument};

use super::{Classified, DockerRuntime};
use crate::error::{Result, RuntimeError};

/// Split an image reference into name and tag.
pub(super) fn parse_image_ref(image: &str) -> (&str, &str) {
    // Digest references are passed through whole
    if image.contains('@') {
        return (image, "");
    }

    if let Some((name, tag)) = image.rsplit_once(':') {
        // "localhost:5000/image" has a registry port, not a tag
        if !tag.contains('/') {
            return (name, tag);
        }
    }

    (image, "latest")
}

impl DockerRuntime {
    /// Pull `image` only when the daemon answers 404 for it.
    #[instrument(skip(self))]
    pub(super) async fn pull_if_absent(&self, image: &str) -> Result<()> {
        match self.docker.inspect_image(image).await {
            Ok(_) => {
                debug!("Image already present");
                return Ok(());
            }
            Err(e) => match self.classify(e, "inspect_image", image) {
                Classified::Missing => {}
                Classified::AlreadyInState => return Ok(()),
                Classified::Failed(err) => return Err(err),
            },
        }

        let (name, tag) = parse_image_ref(image);
        info!(name = %name, tag = %tag, "Pulling image");

        let options = CreateImageOptions {
            from_image: Some(name.to_string()),
            tag: if tag.is_empty() {
                None
            } else {
                Some(tag.to_string())
            },
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            match progress {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(status = %status, "Pull progress");
                    }
                }
                Err(e) => {
                    return Err(RuntimeError::ImagePull {
                        image: image.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!("Image pulled");
        Ok(())
    }
}
