//! Poster and profile image URLs.

pub const IMAGE_BASE_URL: &str = "https://image.tmdb.org/t/p";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSize {
    W185,
    W342,
    W500,
    Original,
}

impl ImageSize {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageSize::W185 => "w185",
            ImageSize::W342 => "w342",
            ImageSize::W500 => "w500",
            ImageSize::Original => "original",
        }
    }
}

/// Which placeholder to show when TMDB has no image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Poster,
    Profile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Image {
    Remote(String),
    Placeholder(ImageKind),
}

impl Image {
    pub fn url(&self) -> Option<&str> {
        match self {
            Image::Remote(url) => Some(url),
            Image::Placeholder(_) => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Image::Placeholder(_))
    }
}

/// Resolve a TMDB image path (e.g. `/kqjL17yufvn9OVLyXYpvtyrFfak.jpg`).
pub fn image(path: Option<&str>, size: ImageSize, kind: ImageKind) -> Image {
    match path.map(str::trim) {
        Some(p) if !p.is_empty() => {
            let sep = if p.starts_with('/') { "" } else { "/" };
            Image::Remote(format!("{IMAGE_BASE_URL}/{}{sep}{p}", size.as_str()))
        }
        _ => Image::Placeholder(kind),
    }
}

pub fn poster(path: Option<&str>, size: ImageSize) -> Image {
    image(path, size, ImageKind::Poster)
}

pub fn profile(path: Option<&str>, size: ImageSize) -> Image {
    image(path, size, ImageKind::Profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_sized_url() {
        let img = poster(Some("/pB8BM7pdSp6B6Ih7QZ4DrQ3PmJK.jpg"), ImageSize::W500);
        assert_eq!(
            img.url(),
            Some("https://image.tmdb.org/t/p/w500/pB8BM7pdSp6B6Ih7QZ4DrQ3PmJK.jpg")
        );
        let img = profile(Some("abc.jpg"), ImageSize::W185);
        assert_eq!(img.url(), Some("https://image.tmdb.org/t/p/w185/abc.jpg"));
    }

    #[test]
    fn missing_path_falls_back_by_kind() {
        assert_eq!(
            poster(None, ImageSize::W342),
            Image::Placeholder(ImageKind::Poster)
        );
        assert_eq!(
            profile(Some("  "), ImageSize::W185),
            Image::Placeholder(ImageKind::Profile)
        );
        assert!(poster(None, ImageSize::W500).url().is_none());
    }
}
