use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use bincode::{deserialize, serialize};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use xz2::read::{XzDecoder, XzEncoder};

use crate::constants::checkpoint::{BEST_TAG, COMPRESSION_LEVEL, EXTENSION, FORMAT_VERSION, LAST_TAG, MAGIC};
use crate::error::{Result, WatermarkError};
use crate::network::{ArchitectureSignature, WatermarkModel};
use crate::nn::{AdamState, Module};

/// Everything needed to continue a run: the epoch it completed, all parameters and both optimizers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
	pub epoch: usize,
	pub signature: ArchitectureSignature,
	pub encoder: Vec<ArrayD<f32>>,
	pub decoder: Vec<ArrayD<f32>>,
	pub discriminator: Vec<ArrayD<f32>>,
	pub enc_dec_optimizer: AdamState,
	pub discriminator_optimizer: AdamState,
}

impl Checkpoint {
	pub fn capture(epoch: usize, model: &WatermarkModel) -> Self {
		Self {
			epoch,
			signature: model.signature().clone(),
			encoder: model.encoder.parameter_values(),
			decoder: model.decoder.parameter_values(),
			discriminator: model.discriminator.parameter_values(),
			enc_dec_optimizer: model.enc_dec_optimizer().state().clone(),
			discriminator_optimizer: model.discriminator_optimizer().state().clone(),
		}
	}

	/// `WMCK`, a big-endian format version, then the xz-compressed, byte-shuffled bincode payload.
	pub fn to_bytes(&self) -> Result<Vec<u8>> {
		let serialized = serialize(self).map_err(|e| WatermarkError::Serialization(format!("Checkpoint encoding failed: {}", e)))?;
		let shuffled = shuffle(&serialized, 4);
		let mut compressed = Vec::new();
		XzEncoder::new(shuffled.as_slice(), COMPRESSION_LEVEL).read_to_end(&mut compressed)?;

		let mut bytes = Vec::with_capacity(compressed.len() + 8);
		bytes.extend_from_slice(MAGIC);
		bytes.write_u32::<BigEndian>(FORMAT_VERSION)?;
		bytes.extend_from_slice(&compressed);
		Ok(bytes)
	}

	pub fn from_bytes(data: &[u8]) -> Result<Self> {
		if data.len() < 8 || &data[..4] != MAGIC {
			return Err(WatermarkError::Serialization("not a watermark checkpoint".into()));
		}
		let version = (&data[4..8]).read_u32::<BigEndian>()?;
		if version != FORMAT_VERSION {
			return Err(WatermarkError::CheckpointVersionMismatch(format!(
				"checkpoint format version {} is not supported (expected {})",
				version, FORMAT_VERSION
			)));
		}
		let mut decompressed = Vec::new();
		XzDecoder::new(&data[8..])
			.read_to_end(&mut decompressed)
			.map_err(|e| WatermarkError::Serialization(format!("Checkpoint decompression failed: {}", e)))?;
		let unshuffled = unshuffle(&decompressed, 4);
		deserialize(&unshuffled).map_err(|e| WatermarkError::Serialization(format!("Checkpoint decoding failed: {}", e)))
	}
}

/// Shuffle f32 bytes so that all first bytes are contiguous etc.
/// Improves compression of floating point data.
fn shuffle(data: &[u8], stride: usize) -> Vec<u8> {
	let mut vec = Vec::with_capacity(data.len());
	for offset in 0..stride {
		for i in 0..(data.len() + stride - 1 - offset) / stride {
			vec.push(data[offset + i * stride])
		}
	}
	debug_assert_eq!(vec.len(), data.len());
	vec
}

/// Inverts `shuffle()`
fn unshuffle(data: &[u8], stride: usize) -> Vec<u8> {
	let mut vec = vec![0; data.len()];
	let mut inc = 0;
	for offset in 0..stride {
		for i in 0..(data.len() + stride - 1 - offset) / stride {
			vec[offset + i * stride] = data[inc];
			inc += 1;
		}
	}
	debug_assert_eq!(inc, data.len());
	vec
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointSlot {
	Epoch(usize),
	Last,
	Best,
}

impl CheckpointSlot {
	pub fn file_name(&self, prefix: &str) -> String {
		match self {
			CheckpointSlot::Epoch(epoch) => format!("{}--epoch-{:04}.{}", prefix, epoch, EXTENSION),
			CheckpointSlot::Last => format!("{}--{}.{}", prefix, LAST_TAG, EXTENSION),
			CheckpointSlot::Best => format!("{}--{}.{}", prefix, BEST_TAG, EXTENSION),
		}
	}

	fn from_path(path: &Path, epoch: usize) -> Self {
		let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
		if stem.ends_with(&format!("--{}", LAST_TAG)) {
			CheckpointSlot::Last
		} else if stem.ends_with(&format!("--{}", BEST_TAG)) {
			CheckpointSlot::Best
		} else {
			CheckpointSlot::Epoch(epoch)
		}
	}
}

/// Identifies a checkpoint on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointHandle {
	pub epoch: usize,
	pub slot: CheckpointSlot,
	pub path: PathBuf,
}

/// Writes checkpoints of one run into a folder as `<prefix>--epoch-NNNN.wmc`, `<prefix>--last.wmc`
/// and `<prefix>--best.wmc`.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
	folder: PathBuf,
	prefix: String,
}

impl CheckpointManager {
	pub fn new(folder: impl AsRef<Path>, prefix: impl Into<String>) -> Self {
		Self {
			folder: folder.as_ref().to_path_buf(),
			prefix: prefix.into(),
		}
	}

	pub fn folder(&self) -> &Path {
		&self.folder
	}

	pub fn path(&self, slot: CheckpointSlot) -> PathBuf {
		self.folder.join(slot.file_name(&self.prefix))
	}

	/// Captures `model` and writes it to the epoch slot and the `last` slot.
	pub fn save(&self, epoch: usize, model: &WatermarkModel) -> Result<CheckpointHandle> {
		self.save_checkpoint(&Checkpoint::capture(epoch, model))
	}

	pub fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<CheckpointHandle> {
		let bytes = checkpoint
			.to_bytes()
			.map_err(|e| WatermarkError::checkpoint_io(&self.folder, e))?;
		let handle = self.write_slot(&bytes, checkpoint.epoch, CheckpointSlot::Epoch(checkpoint.epoch))?;
		self.write_slot(&bytes, checkpoint.epoch, CheckpointSlot::Last)?;
		info!(epoch = checkpoint.epoch, path = %handle.path.display(), "Saved checkpoint");
		Ok(handle)
	}

	/// Writes the `best` slot; which epoch counts as best is decided by the caller.
	pub fn save_best(&self, checkpoint: &Checkpoint) -> Result<CheckpointHandle> {
		let bytes = checkpoint
			.to_bytes()
			.map_err(|e| WatermarkError::checkpoint_io(&self.folder, e))?;
		self.write_slot(&bytes, checkpoint.epoch, CheckpointSlot::Best)
	}

	/// Writes to a temporary file first so that a failed write never clobbers an existing checkpoint.
	fn write_slot(&self, bytes: &[u8], epoch: usize, slot: CheckpointSlot) -> Result<CheckpointHandle> {
		let path = self.path(slot);
		let temp = path.with_extension(format!("{}.tmp", EXTENSION));
		let write = || -> std::io::Result<()> {
			fs::create_dir_all(&self.folder)?;
			let mut file = File::create(&temp)?;
			file.write_all(bytes)?;
			file.sync_all()?;
			fs::rename(&temp, &path)
		};
		write().map_err(|e| {
			let _ = fs::remove_file(&temp);
			WatermarkError::checkpoint_io(&path, e)
		})?;
		Ok(CheckpointHandle { epoch, slot, path })
	}

	pub fn load(path: impl AsRef<Path>) -> Result<Checkpoint> {
		let path = path.as_ref();
		let mut data = Vec::new();
		File::open(path)
			.and_then(|mut file| file.read_to_end(&mut data))
			.map_err(|e| WatermarkError::checkpoint_io(path, e))?;
		Checkpoint::from_bytes(&data)
	}

	/// The valid checkpoint with the highest epoch in `folder`. Unreadable or corrupt files are skipped.
	pub fn load_latest(folder: impl AsRef<Path>) -> Result<(Checkpoint, CheckpointHandle)> {
		let folder = folder.as_ref();
		let entries = fs::read_dir(folder).map_err(|_| WatermarkError::CheckpointNotFound(folder.to_path_buf()))?;
		let mut paths: Vec<PathBuf> = entries
			.filter_map(|entry| entry.ok().map(|e| e.path()))
			.filter(|path| path.extension().and_then(|e| e.to_str()) == Some(EXTENSION))
			.collect();
		paths.sort();

		let mut latest: Option<(Checkpoint, CheckpointHandle)> = None;
		for path in paths {
			match Self::load(&path) {
				Ok(checkpoint) => {
					if latest.as_ref().map_or(true, |(best, _)| checkpoint.epoch > best.epoch) {
						let handle = CheckpointHandle {
							epoch: checkpoint.epoch,
							slot: CheckpointSlot::from_path(&path, checkpoint.epoch),
							path,
						};
						latest = Some((checkpoint, handle));
					}
				}
				Err(e) => debug!(path = %path.display(), error = %e, "Skipping invalid checkpoint"),
			}
		}
		latest.ok_or_else(|| WatermarkError::CheckpointNotFound(folder.to_path_buf()))
	}
}

/// Loads parameters and optimizer state into `model`, which must have been built with the same
/// architecture as the checkpoint.
pub fn restore(model: &mut WatermarkModel, checkpoint: &Checkpoint) -> Result<()> {
	if &checkpoint.signature != model.signature() {
		return Err(WatermarkError::CheckpointVersionMismatch(format!(
			"checkpoint was written by '{}' but the model is '{}'",
			checkpoint.signature,
			model.signature()
		)));
	}
	let mismatch = |e: WatermarkError| WatermarkError::CheckpointVersionMismatch(e.to_string());
	model.encoder.load_parameter_values(&checkpoint.encoder).map_err(mismatch)?;
	model.decoder.load_parameter_values(&checkpoint.decoder).map_err(mismatch)?;
	model
		.discriminator
		.load_parameter_values(&checkpoint.discriminator)
		.map_err(mismatch)?;
	model
		.enc_dec_optimizer_mut()
		.load_state(checkpoint.enc_dec_optimizer.clone())
		.map_err(mismatch)?;
	model
		.discriminator_optimizer_mut()
		.load_state(checkpoint.discriminator_optimizer.clone())
		.map_err(mismatch)?;
	Ok(())
}

/// Restores the newest checkpoint in `folder` and returns the epoch training continues at.
pub fn resume(model: &mut WatermarkModel, folder: impl AsRef<Path>) -> Result<(usize, CheckpointHandle)> {
	let (checkpoint, handle) = CheckpointManager::load_latest(folder)?;
	restore(model, &checkpoint)?;
	info!(epoch = checkpoint.epoch, path = %handle.path.display(), "Restored checkpoint");
	Ok((checkpoint.epoch + 1, handle))
}
