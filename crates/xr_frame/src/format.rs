//! Swapchain colour format negotiation.

use crate::error::XrError;

/// Vulkan format codes, as exposed by runtimes using `XR_KHR_vulkan_enable2`.
pub mod vk {
    pub const R8G8B8A8_UNORM: i64 = 37;
    pub const R8G8B8A8_SRGB: i64 = 43;
    pub const B8G8R8A8_UNORM: i64 = 44;
    pub const B8G8R8A8_SRGB: i64 = 50;
}

/// OpenGL internal formats, as exposed by runtimes using `XR_KHR_opengl_enable`.
pub mod gl {
    pub const RGBA8: i64 = 0x8058;
    pub const RGB10_A2: i64 = 0x8059;
    pub const RGBA16F: i64 = 0x881A;
    pub const SRGB8_ALPHA8: i64 = 0x8C43;
}

/// sRGB first, then linear fallbacks.
pub const DEFAULT_PREFERENCE: &[i64] = &[
    vk::R8G8B8A8_SRGB,
    vk::B8G8R8A8_SRGB,
    vk::R8G8B8A8_UNORM,
    vk::B8G8R8A8_UNORM,
];

/// Picks the highest-ranked preferred format the runtime offers.
pub fn select_swapchain_format(preferred: &[i64], available: &[i64]) -> Result<i64, XrError> {
    preferred
        .iter()
        .copied()
        .find(|f| available.contains(f))
        .ok_or_else(|| XrError::NoSwapchainFormat {
            available: available.to_vec(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preference_order_wins_over_runtime_order() {
        let available = [vk::B8G8R8A8_UNORM, vk::B8G8R8A8_SRGB, vk::R8G8B8A8_UNORM];
        assert_eq!(
            select_swapchain_format(DEFAULT_PREFERENCE, &available).unwrap(),
            vk::B8G8R8A8_SRGB
        );
        assert_eq!(
            select_swapchain_format(&[gl::RGBA16F, gl::RGBA8], &[gl::RGBA8, gl::RGBA16F]).unwrap(),
            gl::RGBA16F
        );
    }

    #[test]
    fn no_match_is_an_error() {
        let err = select_swapchain_format(&[gl::SRGB8_ALPHA8], &[vk::R8G8B8A8_SRGB]).unwrap_err();
        assert!(matches!(err, XrError::NoSwapchainFormat { ref available } if available == &[43]));
    }
}
