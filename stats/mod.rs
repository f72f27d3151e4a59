pub mod design;
pub mod diagnostics;
pub mod pca;
pub mod robust;
pub mod wls;
