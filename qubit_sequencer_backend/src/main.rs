use maplit::hashmap;
use qubit_sequencer_backend::*;

fn main() -> Result<()> {
    let readout = DacBoard::analog("Vince DAC 11")?;
    let bias = DacBoard::analog("Vince DAC 12")?;
    let drive = DacBoard::microwave("Vince DAC 13")?;

    let q0 = Device::new("q0")
        .with_channel(Channel::iq("uw", drive))?
        .with_channel(Channel::analog("z", bias, DacId::A))?
        .with_channel(Channel::preamp("timing", readout, DacId::A))?;
    let mut exp = Experiment::new(vec![q0])?;

    exp.start_sram_block("pi_pulse", 18)?;
    exp.start_sram_block("readout", 300)?;

    let commands = hashmap! {
        "Vince DAC 12".to_string() => vec![MemoryCommand::Encoded(0x100400), MemoryCommand::Encoded(0x200800)],
    };
    exp.add_bias_commands(&commands, 4.3)?;
    exp.start_timer(&[("q0", "timing")])?;
    exp.call_sram_dual_block("pi_pulse", "readout", 0.05)?;
    exp.stop_timer(&[("q0", "timing")])?;

    for program in exp.board_programs() {
        let memory: Vec<String> = program.memory.iter().map(|cmd| cmd.to_string()).collect();
        println!("{} ({}): {}", program.name, program.kind, memory.join(" "));
    }
    println!("SRAM words used: {}", exp.total_sram_length());
    Ok(())
}
