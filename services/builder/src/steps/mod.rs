//! The provisioning steps of an image build, in the order they run.

mod address;
mod attach_volumes;
mod boot_volume;
mod check_volumes;
mod connect;
mod flavor;
mod image;
mod keypair;
mod launch;
mod network;
mod password;
mod provision;
mod source_image;
mod stop;
mod zone;

pub use address::{AllocateAddress, AssociateAddress};
pub use attach_volumes::AttachVolumes;
pub use boot_volume::CreateBootVolume;
pub use check_volumes::CheckVolumes;
pub use connect::{AssumeReachable, Connect, Reachability, TcpProbe};
pub use flavor::LoadFlavor;
pub use image::{CreateImage, ShareImage, UpdateImageMinDisk};
pub use keypair::SetupKeypair;
pub use launch::LaunchInstance;
pub use network::{dns_servers, CreateNetwork};
pub use password::GetPassword;
pub use provision::Provision;
pub use source_image::ResolveSourceImage;
pub use stop::StopInstance;
pub use zone::LoadAvailabilityZone;
