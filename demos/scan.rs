use std::{io, sync::Arc};

use anyhow::Result;
use parking_lot::Mutex;
use varcol::{
    GenomeHelper, InMemoryVariantStore, RowConfigStore, RowProcessor, ScanDecoder, StatValue,
    StorageOptions, StudyConfigurationManager, Variant, VariantRowConverter, VariantStats,
    VariantStore,
};

type BoxedWriter = Box<dyn io::Write + Send>;

const SAMPLES: [&str; 3] = ["NA12878", "NA12891", "NA12892"];

#[derive(Clone)]
pub struct Processor {
    l_buf: Vec<u8>,
    l_variants: usize,

    variants: Arc<Mutex<usize>>,
    writer: Arc<Mutex<BoxedWriter>>,
}
impl Processor {
    pub fn new(writer: BoxedWriter) -> Self {
        Self {
            l_buf: Vec::new(),
            l_variants: 0,
            variants: Arc::new(Mutex::new(0)),
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    pub fn n_variants(&self) -> usize {
        *self.variants.lock()
    }
}
impl RowProcessor for Processor {
    fn process_variant(&mut self, variant: Variant) -> varcol::Result<()> {
        use io::Write;
        write!(
            self.l_buf,
            "{}\t{}\t{}\t{}",
            variant.chromosome,
            variant.position,
            variant.reference,
            variant.alternates.join(",")
        )?;
        for (_, sample, call) in variant.genotypes() {
            write!(self.l_buf, "\t{}={}", sample, call.genotype)?;
        }
        writeln!(self.l_buf)?;
        self.l_variants += 1;
        Ok(())
    }

    fn on_batch_complete(&mut self) -> varcol::Result<()> {
        {
            let mut writer = self.writer.lock();
            writer.write_all(&self.l_buf)?;
            writer.flush()?;
        }
        self.l_buf.clear();

        *self.variants.lock() += self.l_variants;
        self.l_variants = 0;
        Ok(())
    }
}

fn load_variants(
    store: &InMemoryVariantStore,
    manager: &StudyConfigurationManager<RowConfigStore<Arc<InMemoryVariantStore>>>,
    options: &StorageOptions,
) -> Result<()> {
    manager.create_study(1, "trio")?;
    let (config, _) = manager.add_samples(1, 1, "trio.vcf.gz", &SAMPLES)?;

    let converter = VariantRowConverter::new(options);
    for (i, position) in (10_000..10_200).step_by(7).enumerate() {
        let mut variant = Variant::new("chr20", position, "A", &["G"])?;
        for (j, sample) in SAMPLES.iter().enumerate() {
            let text = ["0/0", "0/1", "1/1"][(i + j) % 3];
            variant.set_genotype(1, sample, text.parse()?);
        }
        variant.set_stats(
            1,
            "ALL",
            VariantStats::new().with("alleleCount", StatValue::Integer((i % 6) as i64)),
        );
        store.put(converter.encode_row(&variant, &[&config])?)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let options = StorageOptions::default().with_scan_batch_size(8);
    let store = Arc::new(InMemoryVariantStore::new());
    let manager = StudyConfigurationManager::new(
        RowConfigStore::new(Arc::clone(&store), GenomeHelper::new(&options)),
        &options,
    );
    load_variants(&store, &manager, &options)?;

    let decoder = ScanDecoder::new(&manager, &options);
    let processor = Processor::new(Box::new(io::stdout()));
    decoder.scan_region(store.as_ref(), "20", 10_050, 10_150, processor.clone())?;
    eprintln!("Decoded {} variants", processor.n_variants());

    Ok(())
}
